//! Reliability tracking for upstream proxy-list sources

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::SourceRecord;
use crate::repository::SourceHealthStore;

/// Default score below which a source is skipped
pub const DEFAULT_MIN_HEALTH: u8 = 30;

pub struct SourceHealthMonitor {
    records: Mutex<HashMap<String, SourceRecord>>,
    store: Arc<dyn SourceHealthStore>,
    min_health: u8,
}

impl SourceHealthMonitor {
    pub fn new(store: Arc<dyn SourceHealthStore>, min_health: u8) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            store,
            min_health,
        }
    }

    /// Pull persisted records into memory
    pub async fn load(&self) -> Result<usize> {
        let stored = self.store.load_all().await?;
        let count = stored.len();

        let mut records = self.records.lock();
        for record in stored {
            records.insert(record.url.clone(), record);
        }
        info!(sources = count, "Loaded source health records");
        Ok(count)
    }

    pub async fn record_fetch(&self, url: &str, success: bool, response_time_ms: f64, item_count: u64) {
        self.record_fetch_at(url, success, response_time_ms, item_count, Utc::now())
            .await
    }

    pub async fn record_fetch_at(
        &self,
        url: &str,
        success: bool,
        response_time_ms: f64,
        item_count: u64,
        now: DateTime<Utc>,
    ) {
        let snapshot = {
            let mut records = self.records.lock();
            let record = records
                .entry(url.to_string())
                .or_insert_with(|| SourceRecord::new(url));
            record.record(success, response_time_ms, item_count, now);
            record.clone()
        };

        debug!(
            url,
            success,
            health_score = snapshot.health_score,
            "Recorded source fetch"
        );

        if let Err(e) = self.store.save(&snapshot).await {
            warn!(url, error = %e, "Failed to persist source health");
        }
    }

    /// Unseen sources are given the benefit of the doubt
    pub fn is_healthy(&self, url: &str, min_score: u8) -> bool {
        self.records
            .lock()
            .get(url)
            .map(|r| r.health_score >= min_score)
            .unwrap_or(true)
    }

    pub fn filter_healthy(&self, urls: &[String]) -> Vec<String> {
        let healthy: Vec<String> = urls
            .iter()
            .filter(|url| self.is_healthy(url, self.min_health))
            .cloned()
            .collect();

        if healthy.len() < urls.len() {
            info!(
                skipped = urls.len() - healthy.len(),
                "Skipping unhealthy sources"
            );
        }
        healthy
    }

    pub fn get(&self, url: &str) -> Option<SourceRecord> {
        self.records.lock().get(url).cloned()
    }
}
