//! Backoff port - how long a RETRYING job waits before it may be claimed again.

use std::time::Duration;

use crate::domain::Job;

/// Computes the delay since a job's last failure before it becomes
/// claimable again. `attempts` is the number of attempts made so far.
pub trait BackoffStrategy: Send + Sync {
    fn delay(&self, queue_name: &str, attempts: u32, job: &Job) -> Duration;
}

impl<F> BackoffStrategy for F
where
    F: Fn(&str, u32, &Job) -> Duration + Send + Sync,
{
    fn delay(&self, queue_name: &str, attempts: u32, job: &Job) -> Duration {
        self(queue_name, attempts, job)
    }
}

/// Same delay after every failure.
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff(pub Duration);

impl BackoffStrategy for ConstantBackoff {
    fn delay(&self, _queue_name: &str, _attempts: u32, _job: &Job) -> Duration {
        self.0
    }
}

/// `base * attempts`.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    pub base: Duration,
}

impl BackoffStrategy for LinearBackoff {
    fn delay(&self, _queue_name: &str, attempts: u32, _job: &Job) -> Duration {
        self.base.saturating_mul(attempts.max(1))
    }
}

/// `base * 2^(attempts - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, _queue_name: &str, attempts: u32, _job: &Job) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }
}
