//! Waiting options.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exponential backoff between state checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 1.5,
        }
    }
}

impl Backoff {
    /// Constant delay.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            multiplier: 1.0,
        }
    }

    /// Delay following `current`.
    pub fn next(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max)
    }
}

/// How [`JobHandle::result_with`](crate::JobHandle::result_with) waits.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub backoff: Backoff,
    /// Give up after this long
    pub timeout: Option<Duration>,
    /// Stop waiting when cancelled
    pub cancel: Option<CancellationToken>,
    /// How long a completed job may take to show its result file
    /// (shared filesystems lag behind the scheduler).
    pub result_grace: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            timeout: None,
            cancel: None,
            result_grace: Duration::from_secs(30),
        }
    }
}

impl WaitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_result_grace(mut self, grace: Duration) -> Self {
        self.result_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_growth_is_capped() {
        let backoff = Backoff {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(3),
            multiplier: 2.0,
        };
        let second = backoff.next(backoff.initial);
        assert_eq!(second, Duration::from_secs(2));
        assert_eq!(backoff.next(second), Duration::from_secs(3));
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::fixed(Duration::from_millis(10));
        assert_eq!(backoff.next(backoff.initial), Duration::from_millis(10));
    }
}
