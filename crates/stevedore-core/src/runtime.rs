//! Executor-wide runtime capabilities.
//!
//! Clock and randomness are injected rather than read from globals so tests
//! can substitute deterministic implementations, e.g. to exercise certificate
//! expiry scheduling without waiting for wall time.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Wall-clock access.
pub trait Clock: Send + Sync {
    /// Returns the duration until `deadline`, saturating at zero when the
    /// deadline already passed.
    fn until(&self, deadline: SystemTime) -> Duration;
}

/// Randomness source for jitter.
pub trait Random: Send + Sync {
    /// Returns a uniformly distributed duration in `[0, max)`; zero when
    /// `max` is zero.
    fn duration_in(&self, max: Duration) -> Duration;
}

/// System wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn until(&self, deadline: SystemTime) -> Duration {
        deadline
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }
}

/// PRNG-backed randomness.
pub struct SystemRandom {
    rng: Mutex<SmallRng>,
}

impl SystemRandom {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(SmallRng::from_entropy()),
        }
    }
}

impl Default for SystemRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl Random for SystemRandom {
    fn duration_in(&self, max: Duration) -> Duration {
        let nanos = max.as_nanos();
        if nanos == 0 {
            return Duration::ZERO;
        }
        let mut rng = self.rng.lock().expect("rng lock poisoned");
        Duration::from_nanos(rng.gen_range(0..nanos as u64))
    }
}

/// Bundle of runtime capabilities passed to each subsystem at creation.
#[derive(Clone)]
pub struct Runtime {
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn Random>,
}

impl Runtime {
    pub fn new(clock: Arc<dyn Clock>, random: Arc<dyn Random>) -> Self {
        Self { clock, random }
    }

    /// Runtime backed by the system clock and an entropy-seeded PRNG.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(SystemRandom::new()))
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime").finish_non_exhaustive()
    }
}
