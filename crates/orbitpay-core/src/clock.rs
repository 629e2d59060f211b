use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Abstracts "now" so every timing decision in the engine (expiry, renewal
/// windows, lease TTLs) is swappable in tests. Every seed scenario drives a
/// [`TestClock`] rather than sleeping on the wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock callers can advance explicitly instead of sleeping.
#[derive(Debug, Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: crate::common::Duration) {
        let mut guard = self.now.lock().expect("test clock mutex poisoned");
        *guard = *guard + delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().expect("test clock mutex poisoned") = at;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("test clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Duration;

    #[test]
    fn advance_moves_now_forward() {
        let start = Utc::now();
        let clock = TestClock::new(start);
        clock.advance(Duration::days(1));
        assert_eq!((clock.now() - start).num_days(), 1);
    }
}
