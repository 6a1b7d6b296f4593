//! Sift - concurrent proxy discovery, validation, scoring and ranking
//!
//! ## Pipeline
//!
//! - Candidates come from a file or from the built-in source catalog, gated by per-source
//!   health and filtered through persistent dedup sessions
//! - Every proxy is admitted through a shared concurrency controller and paced by one
//!   sliding-window rate limiter
//! - Validation runs ping, protocol detection, a weighted speed test, identity and
//!   geolocation lookups, then scores the proxy 0-100
//! - Results feed streaming analytics, the proxy store and a ranked JSON report

pub mod concurrency;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod scoring;
pub mod services;
pub mod sources;

pub use config::Config;
pub use database::Database;
pub use error::{Result, SiftError};
