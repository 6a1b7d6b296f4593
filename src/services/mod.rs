//! Batch driver, analytics, reporting, rotation and background services

pub mod analytics;
pub mod batch;
pub mod favorites;
pub mod report;
pub mod retention;
pub mod rotator;

pub use analytics::{AnalyticsAggregator, AnalyticsSnapshot};
pub use batch::{
    parse_candidates, BatchConfig, BatchReport, BatchRunner, ExecutionStrategy, RejectedInput,
};
pub use favorites::{Favorite, FavoritesBook, FAVORITE_MIN_SCORE};
pub use report::{write_report, RunReport, TOP_COUNTRIES};
pub use retention::{RetentionConfig, RetentionHandle, RetentionService};
pub use rotator::ProxyRotator;
