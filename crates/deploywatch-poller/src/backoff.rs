//! Adaptive retry cadence shared by polling jobs.
//!
//! Every failure stretches the interval by `1 + delta`; once the last
//! failure is more than half an interval in the past, each `sleep()`
//! shrinks it by `1 - delta` until it is back at the floor.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use deploywatch_core::PollIntervals;

#[derive(Debug)]
struct State {
    current: Duration,
    last_failure: Instant,
}

/// Sleep-duration estimator driven by success/failure signals.
///
/// Safe to share between jobs; all state sits behind one mutex.
#[derive(Debug)]
pub struct Backoff {
    floor: Duration,
    ceiling: Option<Duration>,
    delta: f64,
    state: Mutex<State>,
}

impl Backoff {
    /// Start at `floor`. `delta` must lie strictly between 0 and 1.
    pub fn new(floor: Duration, delta: f64) -> Self {
        debug_assert!(delta > 0.0 && delta < 1.0, "delta out of range: {delta}");
        Self {
            floor,
            ceiling: None,
            delta,
            state: Mutex::new(State {
                current: floor,
                last_failure: Instant::now(),
            }),
        }
    }

    /// Cap how far failures can stretch the interval.
    pub fn with_ceiling(mut self, ceiling: Duration) -> Self {
        self.ceiling = Some(ceiling.max(self.floor));
        self
    }

    /// Backoff for a job whose base cadence is `floor`.
    pub fn for_cadence(floor: Duration, intervals: &PollIntervals) -> Self {
        let backoff = Self::new(floor, intervals.backoff_delta);
        match intervals.backoff_ceiling {
            Some(ceiling) => backoff.with_ceiling(ceiling),
            None => backoff,
        }
    }

    /// Recommended wait before the next attempt.
    ///
    /// Returns the current interval, then decays it if the last failure is
    /// older than half of it.
    pub fn sleep(&self) -> Duration {
        let mut state = self.state.lock().expect("backoff lock");
        let recommended = state.current;

        if state.current > self.floor && state.last_failure.elapsed() * 2 > state.current {
            state.current = scale(state.current, 1.0 - self.delta).max(self.floor);
            debug!(
                from_ms = recommended.as_millis() as u64,
                to_ms = state.current.as_millis() as u64,
                "backoff decayed"
            );
        }

        recommended
    }

    /// Record a failure and return the stretched interval.
    pub fn throttle(&self) -> Duration {
        let mut state = self.state.lock().expect("backoff lock");
        let mut next = scale(state.current, 1.0 + self.delta);
        if let Some(ceiling) = self.ceiling {
            next = next.min(ceiling);
        }
        state.current = next.max(state.current);
        state.last_failure = Instant::now();

        debug!(interval_ms = state.current.as_millis() as u64, "backing off");
        state.current
    }

    /// Current interval without side effects.
    pub fn current(&self) -> Duration {
        self.state.lock().expect("backoff lock").current
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }
}

fn scale(d: Duration, factor: f64) -> Duration {
    Duration::from_nanos((d.as_nanos() as f64 * factor).round() as u64)
}
