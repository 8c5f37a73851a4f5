//! Retry policy for failed job attempts.

use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Default upper bound for backoff delays.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default number of attempts per job, the first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Retry right away.
    Immediate,
    /// Same delay before every retry.
    Fixed(Duration),
    /// Delay grows by `factor` per failed attempt, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

/// How often a failed job is attempted and how long to wait in between.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tileseed::task::RetryPolicy;
///
/// let policy = RetryPolicy::exponential(3);
/// assert_eq!(policy.delay_after(1), Some(Duration::from_millis(100)));
/// assert_eq!(policy.delay_after(2), Some(Duration::from_millis(200)));
/// assert_eq!(policy.delay_after(3), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Immediate,
        }
    }

    /// `max_attempts` attempts separated by `delay`.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    /// `max_attempts` attempts with doubling delays from the defaults.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::with_backoff(
            max_attempts,
            Backoff::Exponential {
                initial: DEFAULT_INITIAL_DELAY,
                max: DEFAULT_MAX_DELAY,
                factor: 2.0,
            },
        )
    }

    pub fn with_backoff(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Delay to wait after `attempts` failed attempts, or `None` when the
    /// job has used up its attempts.
    pub fn delay_after(&self, attempts: u32) -> Option<Duration> {
        if attempts == 0 || attempts >= self.max_attempts {
            return None;
        }
        let delay = match &self.backoff {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential {
                initial,
                max,
                factor,
            } => {
                let exp = i32::try_from(attempts - 1).unwrap_or(i32::MAX);
                let secs = initial.as_secs_f64() * factor.powi(exp);
                if secs.is_finite() && secs < max.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    *max
                }
            }
        };
        Some(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MAX_ATTEMPTS)
    }
}
