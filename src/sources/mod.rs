//! Candidate discovery: source catalog, source health and cross-run dedup

pub mod catalog;
pub mod collector;
pub mod dedup;
pub mod health;

pub use catalog::{IndexedSource, SourceCatalog, SourceCategory, SourceFormat, SourceSpec};
pub use collector::{
    CollectionReport, CollectorConfig, HttpSourceFetcher, SourceCollector, SourceFetcher,
    SourceStat,
};
pub use dedup::{content_hash, DedupResetPolicy, DedupSessionStore};
pub use health::SourceHealthMonitor;
