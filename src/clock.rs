use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Time source injected into every service.
///
/// Lock expiry and cutoff validation are time-driven; injecting the clock
/// lets tests move time forward without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used outside of tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let mut current = self.current.lock().expect("clock poisoned");
        *current = *current + delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut current = self.current.lock().expect("clock poisoned");
        *current = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().expect("clock poisoned")
    }
}
