//! Proxy retention service
//!
//! Drops proxy records that have not been checked within the retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::repository::ProxyStore;

#[derive(Clone)]
pub struct RetentionConfig {
    /// How often to sweep in watch mode
    pub check_interval: Duration,
    /// Records unchecked for longer than this are deleted
    pub retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(3600),
            retention_days: 30,
        }
    }
}

pub struct RetentionService {
    store: Arc<dyn ProxyStore>,
    config: RetentionConfig,
}

impl RetentionService {
    pub fn new(store: Arc<dyn ProxyStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    /// Delete expired records once; returns how many were removed
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days as i64);
        let deleted = self.store.delete_checked_before(cutoff).await?;

        if deleted > 0 {
            info!(count = deleted, cutoff = %cutoff, "Removed stale proxy records");
        }
        Ok(deleted)
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting retention service (interval: {}s, retention: {}d)",
            self.config.check_interval.as_secs(),
            self.config.retention_days
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Retention sweep failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Retention service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for stopping a running retention service
pub struct RetentionHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RetentionHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
