//! Failure classification and retry policy.
//!
//! Every job attempt ends in one of three classes: throttled by an external
//! service, transiently failed, or fatally failed. The class is an explicit
//! value, and the runner's retry decision is a pure function of it rather
//! than an exception caught somewhere up the stack.

use std::time::Duration;

use rand::Rng;

/// Why a job attempt did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// An external service signalled it is over its rate budget.
    /// Retry the whole job after this fixed, service-specific delay.
    Throttled { retry_after: Duration },
    /// Network error, timeout, or 5xx. Retry with exponential backoff.
    Transient,
    /// Target gone or attempts exhausted. No further retry.
    Fatal,
}

/// What the runner should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue the job to run after this delay.
    After(Duration),
    /// Terminal failure; dead-letter the job.
    GiveUp,
}

/// Backoff parameters for transient failures plus the attempt ceiling.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts (1-based) after which any failure becomes fatal.
    pub max_attempts: i32,
    /// Backoff unit for the first transient retry.
    pub base_delay: Duration,
    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,
    /// Add a uniform random fraction of the delay to spread retry storms.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff delay for the attempt that just failed (1-based).
    /// Jitter adds up to one extra delay on top, so the unjittered value is
    /// the floor; the result is always capped at `max_delay`.
    pub fn backoff_delay(&self, attempt: i32) -> Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 31) as u32;
        let unjittered = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);

        if self.jitter {
            let extra = rand::thread_rng().gen_range(0.0..1.0);
            (unjittered + unjittered.mul_f64(extra)).min(self.max_delay)
        } else {
            unjittered
        }
    }

    /// Decide what to do with a failed attempt.
    ///
    /// Once `attempt` reaches `max_attempts`, throttled and transient
    /// failures are downgraded to fatal.
    pub fn decide(&self, class: FailureClass, attempt: i32, max_attempts: i32) -> RetryDecision {
        if attempt >= max_attempts {
            return RetryDecision::GiveUp;
        }

        match class {
            FailureClass::Throttled { retry_after } => RetryDecision::After(retry_after),
            FailureClass::Transient => RetryDecision::After(self.backoff_delay(attempt)),
            FailureClass::Fatal => RetryDecision::GiveUp,
        }
    }
}
