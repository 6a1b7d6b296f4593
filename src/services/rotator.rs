//! Round-robin rotation over recently verified proxies

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::Result;
use crate::models::{ProxyAddress, ProxyRecord, ProxyStatus};
use crate::repository::ProxyStore;

/// Proxies checked longer ago than this drop out of rotation
pub const ROTATION_FRESHNESS_HOURS: i64 = 1;

/// Hands out working proxies in turn
///
/// The pool holds only records whose latest check is `Working` and no older than
/// [`ROTATION_FRESHNESS_HOURS`]. It is shuffled on every refresh and refreshed on demand
/// once it runs dry.
pub struct ProxyRotator {
    store: Arc<dyn ProxyStore>,
    pool: RwLock<Vec<ProxyAddress>>,
    index: AtomicUsize,
}

impl ProxyRotator {
    pub fn new(store: Arc<dyn ProxyStore>) -> Self {
        Self {
            store,
            pool: RwLock::new(Vec::new()),
            index: AtomicUsize::new(0),
        }
    }

    fn eligible(record: &ProxyRecord, now: DateTime<Utc>) -> bool {
        let cutoff = now - ChronoDuration::hours(ROTATION_FRESHNESS_HOURS);
        record.status == ProxyStatus::Working
            && record.last_checked_at.is_some_and(|checked| checked > cutoff)
    }

    /// Rebuild the pool from the store as of `now`; returns its size
    pub async fn refresh_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut fresh: Vec<ProxyAddress> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|record| Self::eligible(record, now))
            .map(|record| record.address)
            .collect();
        fresh.shuffle(&mut rand::thread_rng());

        let size = fresh.len();
        *self.pool.write() = fresh;
        self.index.store(0, Ordering::Relaxed);
        debug!(size, "Rotation pool refreshed");
        Ok(size)
    }

    pub async fn refresh(&self) -> Result<usize> {
        self.refresh_at(Utc::now()).await
    }

    /// Next proxy in turn, refreshing first if the pool is empty
    pub async fn next(&self) -> Result<Option<ProxyAddress>> {
        if self.pool.read().is_empty() {
            self.refresh().await?;
        }
        Ok(self.pick())
    }

    fn pick(&self) -> Option<ProxyAddress> {
        let pool = self.pool.read();
        if pool.is_empty() {
            return None;
        }
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % pool.len();
        pool.get(idx).cloned()
    }

    pub fn available(&self) -> usize {
        self.pool.read().len()
    }
}
