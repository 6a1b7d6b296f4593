use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureReason;
use crate::models::proxy::{Anonymity, GeoInfo, ProtocolSet, ProxyAddress, ProxyStatus};

/// States of the per-proxy validation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    #[default]
    Init,
    PingProbe,
    ProtocolDetect,
    SpeedTest,
    Scored,
}

/// Terminal outcome of a validation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Working,
    Slow,
    Failed(FailureReason),
    Blacklisted,
}

impl ValidationOutcome {
    pub fn status(&self) -> ProxyStatus {
        match self {
            ValidationOutcome::Working => ProxyStatus::Working,
            ValidationOutcome::Slow => ProxyStatus::Slow,
            ValidationOutcome::Failed(_) => ProxyStatus::Failed,
            ValidationOutcome::Blacklisted => ProxyStatus::Blacklisted,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ValidationOutcome::Failed(reason) => Some(*reason),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.status().is_live()
    }
}

/// Exit identity observed through the proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub ip: String,
    pub country: String,
    pub response_time_ms: f64,
    pub endpoint: String,
    pub weight: f64,
}

/// Everything one validation run learned about a proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub proxy: ProxyAddress,
    pub outcome: ValidationOutcome,
    /// Last stage entered before the outcome was decided
    pub stage: ValidationStage,
    pub latency_ms: Option<f64>,
    pub speed_mbps: Option<f64>,
    pub protocols: ProtocolSet,
    pub identity: Option<Identity>,
    pub geo: Option<GeoInfo>,
    /// Forwarding headers the proxy added; `None` when no header audit completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaked_headers: Option<Vec<String>>,
    pub health_score: u8,
    /// Speed endpoints that failed during this run
    pub error_count: u32,
    pub checked_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn new(proxy: ProxyAddress) -> Self {
        Self {
            proxy,
            outcome: ValidationOutcome::Failed(FailureReason::PingFailed),
            stage: ValidationStage::Init,
            latency_ms: None,
            speed_mbps: None,
            protocols: ProtocolSet::new(),
            identity: None,
            geo: None,
            leaked_headers: None,
            health_score: 0,
            error_count: 0,
            checked_at: Utc::now(),
        }
    }

    /// Anonymity class: leaked forwarding headers make a proxy transparent whatever
    /// geolocation says; a clean audit without geolocation counts as anonymous
    pub fn anonymity(&self) -> Anonymity {
        let geo = self.geo.as_ref().map(|g| g.anonymity).unwrap_or_default();
        match &self.leaked_headers {
            Some(leaked) if !leaked.is_empty() => Anonymity::Transparent,
            Some(_) if geo == Anonymity::Unknown => Anonymity::Anonymous,
            _ => geo,
        }
    }

    /// Close the run with a failure at the current stage
    pub fn fail(mut self, reason: FailureReason) -> Self {
        self.outcome = ValidationOutcome::Failed(reason);
        self.health_score = 0;
        self.checked_at = Utc::now();
        self
    }
}

/// Ranked output record for a live proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyReport {
    pub proxy: String,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub latency_ms: Option<f64>,
    pub speed_mbps: Option<f64>,
    pub protocols: ProtocolSet,
    pub status: ProxyStatus,
    pub geo: Option<GeoInfo>,
    pub anonymity: Anonymity,
    pub health_score: u8,
}

impl ProxyReport {
    /// Build a report record; only live results produce one
    pub fn from_result(result: &ValidationResult) -> Option<Self> {
        if !result.outcome.is_live() {
            return None;
        }

        let country = result
            .geo
            .as_ref()
            .and_then(|g| g.country_code.clone().or_else(|| g.country.clone()))
            .or_else(|| {
                result
                    .identity
                    .as_ref()
                    .map(|i| i.country.clone())
                    .filter(|c| c != "?")
            });

        Some(Self {
            proxy: result.proxy.endpoint(),
            ip: result.identity.as_ref().map(|i| i.ip.clone()),
            country,
            latency_ms: result.latency_ms,
            speed_mbps: result.speed_mbps,
            protocols: result.protocols.clone(),
            status: result.outcome.status(),
            geo: result.geo.clone(),
            anonymity: result.anonymity(),
            health_score: result.health_score,
        })
    }
}
