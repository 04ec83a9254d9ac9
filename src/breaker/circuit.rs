//! Sliding-window circuit breaker.
//!
//! # State Transitions
//! ```text
//! Closed → Open: calls in window >= request && failure ratio >= ratio
//! Open → HalfOpen: after cool_down, the next allow() becomes the single probe
//! HalfOpen → Closed: probe succeeds (window statistics are cleared)
//! HalfOpen → Open: probe fails
//! any → Closed: reset()
//! ```

use super::window::RollingWindow;
use super::{Breaker, BreakerState};
use crate::config::BreakerConfig;
use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { since: Instant },
    /// A single probe is in flight; everything else is rejected until it reports.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    window: RollingWindow,
    open_count: u64,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BreakerStats {
    pub state: BreakerState,
    pub successes: u64,
    pub failures: u64,
    /// Number of times the breaker has tripped since creation.
    pub open_count: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    request: u64,
    ratio: f64,
    cool_down: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            name: name.into(),
            request: config.request,
            ratio: config.ratio,
            cool_down: config.cool_down_or_default(),
            inner: Mutex::new(Inner {
                phase: Phase::Closed,
                window: RollingWindow::new(config.bucket_duration(), config.bucket),
                open_count: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Counters stay consistent even if a holder panicked.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        let (successes, failures) = inner.window.totals(Instant::now());
        BreakerStats {
            state: state_of(&inner.phase),
            successes,
            failures,
            open_count: inner.open_count,
        }
    }

    fn trip(&self, inner: &mut Inner, now: Instant) {
        inner.phase = Phase::Open { since: now };
        inner.open_count += 1;
        inner.window.reset();
    }
}

fn state_of(phase: &Phase) -> BreakerState {
    match phase {
        Phase::Closed => BreakerState::Closed,
        Phase::Open { .. } => BreakerState::Open,
        Phase::HalfOpen => BreakerState::HalfOpen,
    }
}

impl Breaker for CircuitBreaker {
    fn allow(&self) -> bool {
        let mut inner = self.lock();
        let phase = inner.phase;
        match phase {
            Phase::Closed => true,
            Phase::Open { since } => {
                if since.elapsed() >= self.cool_down {
                    info!(breaker = %self.name, "Breaker half-open, letting a probe through");
                    inner.phase = Phase::HalfOpen;
                    true
                } else {
                    false
                }
            }
            Phase::HalfOpen => false,
        }
    }

    fn mark_success(&self) {
        let mut inner = self.lock();
        let phase = inner.phase;
        match phase {
            Phase::HalfOpen => {
                info!(breaker = %self.name, "Probe succeeded, breaker closed");
                inner.phase = Phase::Closed;
                inner.window.reset();
            }
            Phase::Closed => inner.window.record(true, Instant::now()),
            // Late result of a call admitted before the trip.
            Phase::Open { .. } => {}
        }
    }

    fn mark_failed(&self) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let now = Instant::now();
        let phase = inner.phase;
        match phase {
            Phase::HalfOpen => {
                warn!(breaker = %self.name, "Probe failed, breaker re-opened");
                self.trip(inner, now);
            }
            Phase::Closed => {
                inner.window.record(false, now);
                let (successes, failures) = inner.window.totals(now);
                let total = successes + failures;
                if total >= self.request && failures as f64 >= self.ratio * total as f64 {
                    warn!(
                        breaker = %self.name,
                        total = total,
                        failures = failures,
                        cool_down_ms = self.cool_down.as_millis() as u64,
                        "Failure ratio exceeded, breaker opened"
                    );
                    self.trip(inner, now);
                }
            }
            Phase::Open { .. } => {}
        }
    }

    fn state(&self) -> BreakerState {
        state_of(&self.lock().phase)
    }

    fn reset(&self) {
        let mut inner = self.lock();
        if !matches!(inner.phase, Phase::Closed) {
            info!(breaker = %self.name, "Breaker forced closed");
        }
        inner.phase = Phase::Closed;
        inner.window.reset();
    }
}
