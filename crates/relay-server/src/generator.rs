//! Synthetic sensor readings for stream sessions.

use std::ops::RangeInclusive;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use relay_core::{Event, Reading, Result};

/// Temperature bounds, degrees Celsius.
pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 18.0..=28.0;
/// Relative humidity bounds, percent.
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 30.0..=80.0;
/// Pressure bounds, hectopascal.
pub const PRESSURE_RANGE: RangeInclusive<f64> = 1000.0..=1020.0;

/// Produces the `message` events a stream session delivers.
///
/// Implementations have no knowledge of connections. A failed
/// [`next`](Self::next) is counted toward the session's failure threshold.
pub trait EventSource: Send + Sync {
    /// Produce the next `message` event.
    fn next(&self) -> Result<Event>;

    /// Pause to await before the following [`next`](Self::next).
    fn interval(&self) -> Duration;
}

/// Random readings within fixed physical bounds, paced uniformly between
/// two intervals.
#[derive(Clone, Debug)]
pub struct SensorGenerator {
    min_interval_ms: u64,
    max_interval_ms: u64,
}

impl SensorGenerator {
    /// Create a generator. Bounds are swapped if given in the wrong order.
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        let a = duration_ms(min_interval);
        let b = duration_ms(max_interval);
        Self {
            min_interval_ms: a.min(b),
            max_interval_ms: a.max(b),
        }
    }

    /// Draw one reading stamped with the current time.
    pub fn reading(&self) -> Reading {
        let mut rng = rand::rng();
        Reading {
            temperature: round1(rng.random_range(TEMPERATURE_RANGE)),
            humidity: round1(rng.random_range(HUMIDITY_RANGE)),
            pressure: round1(rng.random_range(PRESSURE_RANGE)),
            timestamp: Utc::now(),
        }
    }
}

impl Default for SensorGenerator {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(2000))
    }
}

impl EventSource for SensorGenerator {
    fn next(&self) -> Result<Event> {
        Ok(Event::message(self.reading()))
    }

    fn interval(&self) -> Duration {
        if self.min_interval_ms == self.max_interval_ms {
            return Duration::from_millis(self.min_interval_ms);
        }
        Duration::from_millis(
            rand::rng().random_range(self.min_interval_ms..=self.max_interval_ms),
        )
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Round to one decimal place.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
