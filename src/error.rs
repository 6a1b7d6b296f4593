use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the Sift engine
#[derive(Error, Debug)]
pub enum SiftError {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    // Input errors
    #[error("Malformed proxy address: {0}")]
    MalformedInput(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Probe errors
    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    #[error("Transient transport error: {0}")]
    TransientTransport(String),

    #[error("Rate limited by {endpoint} (HTTP {status})")]
    RateLimited { endpoint: String, status: u16 },

    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },

    // Source errors
    #[error("Source fetch failed for {url}: {reason}")]
    SourceFetch { url: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation timed out")]
    Timeout,

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Sift operations
pub type Result<T> = std::result::Result<T, SiftError>;

/// Classification of failures across the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connectivity,
    Protocol,
    Performance,
    TransientTransport,
    RateLimited,
    MalformedInput,
    SourceFetch,
    Persistence,
    Configuration,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Performance => "performance",
            ErrorKind::TransientTransport => "transient_transport",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::MalformedInput => "malformed_input",
            ErrorKind::SourceFetch => "source_fetch",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason attached to a `Failed` validation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PingFailed,
    NoProtocols,
    SpeedTestFailed,
    DeadlineExceeded,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::PingFailed => "ping_failed",
            FailureReason::NoProtocols => "no_protocols",
            FailureReason::SpeedTestFailed => "speed_test_failed",
            FailureReason::DeadlineExceeded => "deadline_exceeded",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ping_failed" => Some(FailureReason::PingFailed),
            "no_protocols" => Some(FailureReason::NoProtocols),
            "speed_test_failed" => Some(FailureReason::SpeedTestFailed),
            "deadline_exceeded" => Some(FailureReason::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FailureReason::PingFailed => ErrorKind::Connectivity,
            FailureReason::NoProtocols => ErrorKind::Protocol,
            FailureReason::SpeedTestFailed => ErrorKind::Performance,
            FailureReason::DeadlineExceeded => ErrorKind::TransientTransport,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl SiftError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SiftError::Database(_)
            | SiftError::DatabaseConnection(_)
            | SiftError::Persistence(_) => ErrorKind::Persistence,

            SiftError::MalformedInput(_) | SiftError::UnsupportedProtocol(_) => {
                ErrorKind::MalformedInput
            }

            SiftError::ProxyConnectionFailed(_) => ErrorKind::Connectivity,

            SiftError::TransientTransport(_) | SiftError::Timeout | SiftError::Io(_) => {
                ErrorKind::TransientTransport
            }

            SiftError::RateLimited { .. } => ErrorKind::RateLimited,

            SiftError::UnexpectedStatus { .. } | SiftError::Http(_) => ErrorKind::Protocol,

            SiftError::SourceFetch { .. } => ErrorKind::SourceFetch,

            SiftError::InvalidConfig(_) => ErrorKind::Configuration,

            SiftError::Serialization(_) | SiftError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientTransport)
    }
}

impl From<reqwest::Error> for SiftError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            SiftError::TransientTransport(err.to_string())
        } else if err.is_builder() {
            SiftError::MalformedInput(err.to_string())
        } else {
            SiftError::Http(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for SiftError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SiftError::Timeout
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for SiftError {
    fn from(err: url::ParseError) -> Self {
        SiftError::MalformedInput(err.to_string())
    }
}
