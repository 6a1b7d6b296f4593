//! Admission, pacing and load-aware sizing shared by every network-facing component

pub mod adaptive;
pub mod controller;
pub mod rate_limit;

pub use adaptive::{adjust, optimal_concurrency, AdaptiveConcurrency, AdaptiveConfig, LoadSnapshot};
pub use controller::{AdmissionPermit, ConcurrencyController};
pub use rate_limit::RateLimiter;
