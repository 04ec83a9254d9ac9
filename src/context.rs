//! Caller-supplied deadlines.
//!
//! Every data operation takes a `&Context`. The effective deadline of a call is the
//! earlier of the caller's deadline and the operation class timeout from
//! [`Config`](crate::Config). Cancellation beyond deadlines is done the usual async way:
//! drop the future.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    deadline: Option<Instant>,
}

impl Context {
    /// A context without a deadline; only configured timeouts apply.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the caller's deadline, if any.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Clamp an operation timeout to the caller's deadline.
    pub fn shrink(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => remaining.min(timeout),
            None => timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_keeps_timeout() {
        let ctx = Context::background();
        assert_eq!(ctx.deadline(), None);
        assert_eq!(ctx.shrink(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn test_earlier_caller_deadline_wins() {
        let ctx = Context::with_timeout(Duration::from_millis(100));
        assert!(ctx.shrink(Duration::from_secs(30)) <= Duration::from_millis(100));
    }

    #[test]
    fn test_earlier_config_timeout_wins() {
        let ctx = Context::with_timeout(Duration::from_secs(60));
        assert_eq!(ctx.shrink(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[test]
    fn test_expired_deadline_shrinks_to_zero() {
        let ctx = Context::with_deadline(Instant::now() - Duration::from_secs(1));
        assert_eq!(ctx.shrink(Duration::from_secs(1)), Duration::ZERO);
    }
}
