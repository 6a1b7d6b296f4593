//! Admission control for proxy validations
//!
//! The semaphore here is the single source of truth for how many proxies are being
//! validated at once. Request pacing is delegated to the shared [`RateLimiter`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::concurrency::rate_limit::RateLimiter;
use crate::error::{Result, SiftError};

/// Permit held for the lifetime of one validation
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

pub struct ConcurrencyController {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
    rate_limiter: RateLimiter,
}

impl ConcurrencyController {
    pub fn new(max_concurrent: usize, rate_limiter: RateLimiter) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            limit: AtomicUsize::new(max_concurrent),
            rate_limiter,
        }
    }

    /// Wait for a free validation slot
    pub async fn admit(&self) -> Result<AdmissionPermit> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SiftError::Internal("admission semaphore closed".into()))?;
        Ok(AdmissionPermit { _permit: permit })
    }

    /// Wait for one request's worth of rate budget
    pub async fn pace(&self) {
        self.rate_limiter.admit().await;
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Current admission limit
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Validations currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.limit()
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Change the admission limit. Growing takes effect immediately; shrinking retires
    /// permits as running validations release them.
    pub fn resize(&self, new_limit: usize) {
        let new_limit = new_limit.max(1);
        let old_limit = self.limit.swap(new_limit, Ordering::AcqRel);

        if new_limit > old_limit {
            self.semaphore.add_permits(new_limit - old_limit);
            info!(from = old_limit, to = new_limit, "Admission limit raised");
        } else if new_limit < old_limit {
            let retire = (old_limit - new_limit) as u32;
            let semaphore = self.semaphore.clone();
            tokio::spawn(async move {
                if let Ok(permits) = semaphore.acquire_many_owned(retire).await {
                    permits.forget();
                    debug!(retired = retire, "Retired admission permits");
                }
            });
            info!(from = old_limit, to = new_limit, "Admission limit lowered");
        }
    }

    /// Stop all future admissions
    pub fn close(&self) {
        self.semaphore.close();
    }
}
