pub mod health;
pub mod ranking;
pub mod trend;

pub use health::score;
pub use ranking::{
    categorize, sort_by_quality, CategoryCounts, PerformanceCategory, RankedProxy, ResultFilter,
};
pub use trend::{stability, trend, QualityTrend, TrendLabel};
