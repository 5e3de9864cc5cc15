// Monotonic clock with a precise "sleep until" primitive
//
// The streaming loop paces commands against absolute deadlines. Plain
// thread::sleep can overshoot by several milliseconds, so the real clock
// sleeps coarsely and spins through the last stretch.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Time source for the motion sequencer
pub trait Clock {
    fn now(&self) -> Instant;

    /// Block until `deadline` has passed; returns at once if it already has
    fn sleep_until(&self, deadline: Instant);

    fn sleep(&self, duration: Duration) {
        self.sleep_until(self.now() + duration);
    }
}

/// Default time left to spin instead of sleeping
pub const DEFAULT_SPIN_THRESHOLD: Duration = Duration::from_millis(2);

/// Wall clock: OS sleep for the bulk of the wait, busy spin for the rest
#[derive(Debug, Clone, Copy)]
pub struct HybridClock {
    spin_threshold: Duration,
}

impl HybridClock {
    pub fn new(spin_threshold: Duration) -> Self {
        Self { spin_threshold }
    }
}

impl Default for HybridClock {
    fn default() -> Self {
        Self::new(DEFAULT_SPIN_THRESHOLD)
    }
}

impl Clock for HybridClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep_until(&self, deadline: Instant) {
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let remaining = deadline - now;
            if remaining > self.spin_threshold {
                std::thread::sleep(remaining - self.spin_threshold);
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Simulated clock: sleeping advances time instantly
///
/// Every wake-up can overshoot by a fixed `jitter`, and each requested
/// deadline is kept so tests can check the pacing.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    inner: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    jitter: Duration,
    deadlines: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            inner: Mutex::new(ManualState::default()),
        }
    }

    /// Overshoot every sleep by `jitter`
    pub fn with_jitter(jitter: Duration) -> Self {
        let clock = Self::new();
        clock.state().jitter = jitter;
        clock
    }

    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        self.state().elapsed
    }

    /// Requested deadlines, relative to [`ManualClock::origin`]
    pub fn deadlines(&self) -> Vec<Duration> {
        self.state().deadlines.clone()
    }

    /// Move time forward without sleeping
    pub fn advance(&self, by: Duration) {
        self.state().elapsed += by;
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.state().elapsed
    }

    fn sleep_until(&self, deadline: Instant) {
        let target = deadline.saturating_duration_since(self.origin);
        let mut state = self.state();
        state.deadlines.push(target);
        if target > state.elapsed {
            state.elapsed = target + state.jitter;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hybrid_clock_hits_deadline() {
        let clock = HybridClock::default();
        for _ in 0..5 {
            let deadline = clock.now() + Duration::from_millis(10);
            clock.sleep_until(deadline);
            let woke = Instant::now();
            assert!(woke >= deadline);
            // generous bound, CI machines are noisy
            assert!(woke - deadline < Duration::from_millis(20));
        }
    }

    #[test]
    fn test_hybrid_clock_past_deadline_returns() {
        let clock = HybridClock::default();
        let before = Instant::now();
        clock.sleep_until(before);
        assert!(before.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn test_manual_clock_advances_on_sleep() {
        let clock = ManualClock::with_jitter(Duration::from_millis(1));
        clock.sleep(Duration::from_millis(100));
        assert_eq!(clock.elapsed(), Duration::from_millis(101));
        assert_eq!(clock.deadlines(), vec![Duration::from_millis(100)]);

        // A deadline already behind us does not move time
        clock.sleep_until(clock.origin() + Duration::from_millis(50));
        assert_eq!(clock.elapsed(), Duration::from_millis(101));
    }
}
