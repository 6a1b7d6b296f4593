//! Proxy validation
//!
//! This module provides:
//! - Raw protocol tunnels (HTTP CONNECT, SOCKS4, SOCKS5)
//! - The `Prober` network seam and its reqwest implementation
//! - Exit-IP identity and geolocation lookups
//! - Forwarding-header anonymity audit
//! - The per-proxy validation state machine

pub mod geo;
pub mod headers;
pub mod identity;
pub mod probe;
pub mod transport;
pub mod validator;

pub use geo::GeoLocator;
pub use headers::HeaderAuditor;
pub use identity::{IdentityConfig, IdentityResolver};
pub use probe::{FetchResponse, HttpProber, Prober};
pub use transport::ProxyTransport;
pub use validator::{ProxyValidator, ValidationProgress, ValidatorConfig};
