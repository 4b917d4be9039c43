//! Per-service call spacing.
//!
//! A per-process approximation of the shared rate budget: a semaphore caps
//! concurrent calls and a minimum interval spreads them over the minute.
//! Cross-process budgets would need an external counter; the job-level
//! throttle retry in the runner is the backstop when the budget is wrong.

use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::debug;

use super::Service;
use crate::config::ServiceLimits;

/// Maximum in-flight calls to a single service from this process.
const MAX_CONCURRENT_CALLS: usize = 10;

/// Spaces calls to one external service.
pub struct ServiceLimiter {
    service: Service,
    semaphore: Semaphore,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl ServiceLimiter {
    pub fn new(service: Service, limits: ServiceLimits) -> Self {
        Self {
            service,
            semaphore: Semaphore::new(MAX_CONCURRENT_CALLS),
            min_interval: limits.min_interval(),
            last_call: Mutex::new(None),
        }
    }

    /// Wait until a call to the service is allowed. The returned permit must
    /// be held for the duration of the call.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        // The semaphore is never closed.
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("service limiter semaphore closed");

        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(service = %self.service, wait_ms = wait.as_millis() as u64, "spacing call");
                tokio::time::sleep(wait).await;
            }
        }
        *last_call = Some(Instant::now());

        permit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced_by_the_minimum_interval() {
        let limiter = ServiceLimiter::new(
            Service::Authority,
            ServiceLimits::new(6, Duration::from_secs(60)), // 10s spacing
        );

        let start = Instant::now();
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);
        drop(limiter.acquire().await);

        // First call is free, the next two wait 10s each.
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn first_call_is_not_delayed() {
        let limiter = ServiceLimiter::new(
            Service::SearchIndex,
            ServiceLimits::new(20, Duration::from_secs(30)),
        );

        let start = Instant::now();
        drop(limiter.acquire().await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
