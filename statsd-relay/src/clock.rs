use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock reader, injected everywhere a timestamp or duration is taken.
///
/// Returns seconds since the Unix epoch as a float. Passing the clock in at
/// construction keeps the processor and every aggregator deterministic under
/// test; nothing in the crate reads the system time directly.
pub type WallClock = Arc<dyn Fn() -> f64 + Send + Sync>;

/// The real system clock.
pub fn system_clock() -> WallClock {
    Arc::new(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs_f64())
            .unwrap_or(0.0)
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::WallClock;

    /// A clock that only moves when the test advances it.
    #[derive(Clone)]
    pub struct ManualClock {
        now: Arc<Mutex<f64>>,
    }

    impl ManualClock {
        pub fn new(start: f64) -> Self {
            ManualClock { now: Arc::new(Mutex::new(start)) }
        }

        pub fn advance(&self, seconds: f64) {
            *self.now.lock().unwrap() += seconds;
        }

        pub fn as_wall_clock(&self) -> WallClock {
            let now = Arc::clone(&self.now);
            Arc::new(move || *now.lock().unwrap())
        }
    }
}
