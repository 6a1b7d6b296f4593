use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dedup session identity: a source's category and its stable index in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub category: String,
    pub index: usize,
}

impl SessionKey {
    pub fn new(category: &str, index: usize) -> Self {
        Self {
            category: category.to_string(),
            index,
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_downloaded", self.category, self.index)
    }
}

/// Fetch history of one upstream proxy-list source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    pub success_count: u64,
    pub fail_count: u64,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub total_proxies: u64,
    pub health_score: u8,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_fail_at: Option<DateTime<Utc>>,
}

impl SourceRecord {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            success_count: 0,
            fail_count: 0,
            total_requests: 0,
            avg_response_time_ms: 0.0,
            total_proxies: 0,
            health_score: 100,
            last_success_at: None,
            last_fail_at: None,
        }
    }

    /// Record one fetch attempt and recompute the health score
    pub fn record(&mut self, success: bool, response_time_ms: f64, item_count: u64, now: DateTime<Utc>) {
        self.total_requests += 1;

        if success {
            self.success_count += 1;
            self.last_success_at = Some(now);
            self.total_proxies += item_count;
            self.avg_response_time_ms = if self.avg_response_time_ms == 0.0 {
                response_time_ms
            } else {
                (self.avg_response_time_ms + response_time_ms) / 2.0
            };
        } else {
            self.fail_count += 1;
            self.last_fail_at = Some(now);
        }

        self.health_score = self.compute_score(now);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_requests as f64
        }
    }

    /// `max(0, successRate*100 - penalty)` where the penalty grows by one point per hour
    /// beyond 24h without success, capped at 50.
    pub fn compute_score(&self, now: DateTime<Utc>) -> u8 {
        let penalty = match (self.last_success_at, self.last_fail_at) {
            (Some(last_success), Some(_)) => {
                let hours = (now - last_success).num_seconds() as f64 / 3600.0;
                if hours > 24.0 {
                    (hours - 24.0).min(50.0)
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        (self.success_rate() * 100.0 - penalty).max(0.0).trunc() as u8
    }
}
