//! Tunables for the verification pipeline.

use std::time::Duration;

use crate::queue::Lane;
use crate::retry::RetryPolicy;

/// Rate budget for one external service.
#[derive(Debug, Clone, Copy)]
pub struct ServiceLimits {
    /// Calls per minute this process may make to the service.
    pub calls_per_minute: u32,
    /// Fixed delay before retrying a job after the service throttles us.
    pub retry_after: Duration,
}

impl ServiceLimits {
    pub const fn new(calls_per_minute: u32, retry_after: Duration) -> Self {
        Self {
            calls_per_minute,
            retry_after,
        }
    }

    /// Minimum spacing between two calls implied by the per-minute budget.
    pub fn min_interval(&self) -> Duration {
        if self.calls_per_minute == 0 {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(60) / self.calls_per_minute
        }
    }
}

/// Per-service rate budgets.
#[derive(Debug, Clone, Copy)]
pub struct RateLimits {
    pub page: ServiceLimits,
    pub search_index: ServiceLimits,
    pub authority: ServiceLimits,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            page: ServiceLimits::new(10, Duration::from_secs(60)),
            search_index: ServiceLimits::new(20, Duration::from_secs(30)),
            authority: ServiceLimits::new(10, Duration::from_secs(60)),
        }
    }
}

/// How many queued-but-unstarted jobs a single worker may hold per lane.
#[derive(Debug, Clone, Copy)]
pub struct LaneBudgets {
    pub urgent: i64,
    pub standard: i64,
    pub weekly: i64,
}

impl LaneBudgets {
    pub fn for_lane(&self, lane: Lane) -> i64 {
        match lane {
            Lane::Urgent => self.urgent,
            Lane::Standard => self.standard,
            Lane::Weekly => self.weekly,
        }
    }
}

impl Default for LaneBudgets {
    fn default() -> Self {
        Self {
            urgent: 4,
            standard: 2,
            weekly: 1,
        }
    }
}

/// Full configuration surface of the pipeline.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub rate_limits: RateLimits,
    pub retry: RetryPolicy,

    /// Budget for the probe sequence inside one job attempt. The worker is
    /// expected to wrap up within this window.
    pub soft_time_limit: Duration,
    /// Forcible termination point for one job attempt. Must stay above the
    /// soft limit; the queue lease must in turn stay above this.
    pub hard_time_limit: Duration,

    pub lane_budgets: LaneBudgets,
    /// Delay inserted between consecutive owners in the weekly sweep.
    pub sweep_stagger: Duration,
    /// Number of concurrent job-runner loops.
    pub workers: usize,
    /// How long a runner sleeps when no jobs are ready.
    pub poll_interval: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimits::default(),
            retry: RetryPolicy::default(),
            soft_time_limit: Duration::from_secs(300),
            hard_time_limit: Duration::from_secs(360),
            lane_budgets: LaneBudgets::default(),
            sweep_stagger: Duration::from_secs(300),
            workers: 4,
            poll_interval: Duration::from_secs(5),
        }
    }
}
