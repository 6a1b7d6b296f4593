//! Storage seams for proxies, source health and dedup sessions
//!
//! PostgreSQL implementations back a configured database; the in-memory ones are used
//! when persistence is disabled and in tests.

pub mod dedup;
pub mod memory;
pub mod proxy;
pub mod source_health;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ProxyRecord, SessionKey, SourceRecord};

pub use dedup::DedupRepository;
pub use memory::{MemoryDedupStore, MemoryProxyStore, MemorySourceHealthStore};
pub use proxy::ProxyRepository;
pub use source_health::SourceHealthRepository;

/// Persisted proxy database keyed by `ip:port`
#[async_trait]
pub trait ProxyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ProxyRecord>>;

    async fn upsert(&self, record: &ProxyRecord) -> Result<()>;

    async fn list(&self) -> Result<Vec<ProxyRecord>>;

    /// Remove records whose last check (or creation, if never checked) predates `cutoff`
    async fn delete_checked_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn blacklisted_hosts(&self) -> Result<Vec<String>>;

    async fn add_blacklisted_host(&self, host: &str) -> Result<()>;
}

/// Per-source fetch history
#[async_trait]
pub trait SourceHealthStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<SourceRecord>>;

    async fn save(&self, record: &SourceRecord) -> Result<()>;
}

/// Content hashes already delivered per source
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<(SessionKey, Vec<String>)>>;

    async fn add_hashes(&self, key: &SessionKey, hashes: &[String]) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}
