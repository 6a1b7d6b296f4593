//! Per-proxy validation state machine
//!
//! `Init -> PingProbe -> ProtocolDetect -> SpeedTest -> Scored`, ending in `Working`,
//! `Slow`, `Failed(reason)` or `Blacklisted`. Every network call waits on the shared
//! rate limiter first.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::concurrency::ConcurrencyController;
use crate::error::FailureReason;
use crate::models::{
    CheckLevel, ProtocolSet, ProxyAddress, ProxyProtocol, TestEndpoint,
    ValidationOutcome, ValidationResult, ValidationStage,
};
use crate::proxy::geo::GeoLocator;
use crate::proxy::headers::HeaderAuditor;
use crate::proxy::identity::{IdentityConfig, IdentityResolver};
use crate::proxy::probe::Prober;
use crate::scoring;

/// Validator configuration
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub check_level: CheckLevel,
    /// Weighted throughput endpoints; the check level decides how many are used
    pub test_endpoints: Vec<TestEndpoint>,
    pub ping_timeout: Duration,
    /// Timeout for each protocol probe
    pub protocol_timeout: Duration,
    pub identity_enabled: bool,
    pub geolocation_enabled: bool,
    /// Check for forwarding headers added by the proxy
    pub header_audit_enabled: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            check_level: CheckLevel::Normal,
            test_endpoints: TestEndpoint::defaults(),
            ping_timeout: Duration::from_secs(5),
            protocol_timeout: Duration::from_secs(5),
            identity_enabled: true,
            geolocation_enabled: true,
            header_audit_enabled: true,
        }
    }
}

/// How the speed test and identity lookups address the proxy
pub fn tunnel_protocol(protocols: &ProtocolSet) -> ProxyProtocol {
    if protocols.iter().any(|p| p.is_http()) {
        ProxyProtocol::Http
    } else if protocols.contains(&ProxyProtocol::Socks5) {
        ProxyProtocol::Socks5
    } else {
        ProxyProtocol::Http
    }
}

/// Throughput in Mbps for `bytes` transferred in `elapsed`
pub fn throughput_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64().max(0.001);
    bytes as f64 * 8.0 / 1_000_000.0 / secs
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Snapshot of a validation in flight, refreshed at every stage transition so a caller
/// that drops the validation future can still report how far it got
#[derive(Debug, Clone, Default)]
pub struct ValidationProgress {
    latest: Arc<Mutex<Option<ValidationResult>>>,
}

impl ValidationProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, result: &ValidationResult) {
        *self.latest.lock() = Some(result.clone());
    }

    /// Latest snapshot, or a fresh `Init` result for `proxy` if nothing was recorded
    pub fn last(&self, proxy: ProxyAddress) -> ValidationResult {
        self.latest
            .lock()
            .clone()
            .unwrap_or_else(|| ValidationResult::new(proxy))
    }
}

fn advance(result: &mut ValidationResult, stage: ValidationStage, progress: &ValidationProgress) {
    result.stage = stage;
    progress.record(result);
}

pub struct ProxyValidator {
    prober: Arc<dyn Prober>,
    controller: Arc<ConcurrencyController>,
    blacklist: DashSet<String>,
    identity: Option<IdentityResolver>,
    geo: Option<GeoLocator>,
    headers: Option<HeaderAuditor>,
    config: ValidatorConfig,
}

impl ProxyValidator {
    pub fn new(
        prober: Arc<dyn Prober>,
        controller: Arc<ConcurrencyController>,
        config: ValidatorConfig,
        identity_config: IdentityConfig,
    ) -> Self {
        let limiter = controller.rate_limiter().clone();
        let identity = config
            .identity_enabled
            .then(|| IdentityResolver::new(prober.clone(), limiter.clone(), identity_config));
        let geo = config
            .geolocation_enabled
            .then(|| GeoLocator::new(prober.clone(), limiter.clone()));
        let headers = config
            .header_audit_enabled
            .then(|| HeaderAuditor::new(prober.clone(), limiter));

        Self {
            prober,
            controller,
            blacklist: DashSet::new(),
            identity,
            geo,
            headers,
            config,
        }
    }

    pub fn controller(&self) -> &Arc<ConcurrencyController> {
        &self.controller
    }

    /// Add a host (or `ip:port`) that must never be probed
    pub fn blacklist(&self, entry: impl Into<String>) {
        self.blacklist.insert(entry.into());
    }

    pub fn is_blacklisted(&self, proxy: &ProxyAddress) -> bool {
        self.blacklist.contains(&proxy.host) || self.blacklist.contains(&proxy.endpoint())
    }

    /// Drive one proxy through the state machine
    pub async fn validate(&self, proxy: ProxyAddress) -> ValidationResult {
        self.validate_with_progress(proxy, &ValidationProgress::new())
            .await
    }

    /// Like [`validate`](Self::validate), recording each stage reached into `progress`
    #[instrument(skip(self, progress), fields(proxy = %proxy))]
    pub async fn validate_with_progress(
        &self,
        proxy: ProxyAddress,
        progress: &ValidationProgress,
    ) -> ValidationResult {
        let mut result = ValidationResult::new(proxy);

        if self.is_blacklisted(&result.proxy) {
            debug!("Blacklisted, skipping");
            result.outcome = ValidationOutcome::Blacklisted;
            result.checked_at = Utc::now();
            return result;
        }

        advance(&mut result, ValidationStage::PingProbe, progress);
        self.controller.pace().await;
        let latency = match self
            .prober
            .ping(&result.proxy.host, self.config.ping_timeout)
            .await
        {
            Ok(rtt) => rtt.as_secs_f64() * 1000.0,
            Err(e) => {
                debug!(error = %e, "Ping probe failed");
                return result.fail(FailureReason::PingFailed);
            }
        };
        result.latency_ms = Some(latency);

        advance(&mut result, ValidationStage::ProtocolDetect, progress);
        result.protocols = self.detect_protocols(&result.proxy).await;
        if result.protocols.is_empty() {
            debug!("No protocol answered");
            return result.fail(FailureReason::NoProtocols);
        }

        advance(&mut result, ValidationStage::SpeedTest, progress);
        let via = tunnel_protocol(&result.protocols);
        let (speed, failed_endpoints) = self.speed_test(&result.proxy, via).await;
        result.error_count = failed_endpoints;
        let Some(speed) = speed else {
            debug!(failed_endpoints, "Every speed endpoint failed");
            return result.fail(FailureReason::SpeedTestFailed);
        };
        result.speed_mbps = Some(speed);

        let preset = self.config.check_level.preset();
        result.outcome = if speed >= preset.min_speed_mbps {
            ValidationOutcome::Working
        } else {
            ValidationOutcome::Slow
        };

        if let Some(resolver) = &self.identity {
            result.identity = resolver.resolve(&result.proxy, via).await;
        }
        if let (Some(locator), Some(identity)) = (&self.geo, &result.identity) {
            result.geo = Some(locator.locate(&identity.ip).await);
        }

        if let Some(auditor) = &self.headers {
            result.leaked_headers = auditor.audit(&result.proxy, via).await;
        }
        let anonymity = result.anonymity();
        if let Some(geo) = result.geo.as_mut() {
            geo.anonymity = anonymity;
        }

        let is_hosting = result.geo.as_ref().is_some_and(|g| g.is_hosting);
        result.health_score =
            scoring::score(latency, speed, anonymity, is_hosting, result.error_count);
        advance(&mut result, ValidationStage::Scored, progress);
        result.checked_at = Utc::now();

        debug!(
            outcome = ?result.outcome,
            latency_ms = latency,
            speed_mbps = speed,
            health_score = result.health_score,
            "Validation finished"
        );
        result
    }

    async fn detect_protocols(&self, proxy: &ProxyAddress) -> ProtocolSet {
        let probes = ProxyProtocol::ALL.iter().map(|&protocol| async move {
            self.controller.pace().await;
            match self
                .prober
                .probe_protocol(proxy, protocol, self.config.protocol_timeout)
                .await
            {
                Ok(()) => Some(protocol),
                Err(e) => {
                    debug!(protocol = protocol.as_str(), error = %e, "Protocol probe failed");
                    None
                }
            }
        });

        futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Weighted average speed over the endpoints that answered 200, plus the failure count
    async fn speed_test(&self, proxy: &ProxyAddress, via: ProxyProtocol) -> (Option<f64>, u32) {
        let preset = self.config.check_level.preset();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut failed = 0u32;

        for endpoint in self.config.test_endpoints.iter().take(preset.max_tests) {
            self.controller.pace().await;
            match self
                .prober
                .fetch(proxy, via, &endpoint.url, endpoint.timeout, endpoint.verify_tls)
                .await
            {
                Ok(response) if response.status == 200 => {
                    let speed = throughput_mbps(response.size_bytes(), response.elapsed);
                    weighted_sum += speed * endpoint.weight;
                    weight_total += endpoint.weight;
                }
                Ok(response) => {
                    debug!(url = %endpoint.url, status = response.status, "Speed endpoint rejected");
                    failed += 1;
                }
                Err(e) => {
                    debug!(url = %endpoint.url, error = %e, "Speed endpoint failed");
                    failed += 1;
                }
            }
        }

        if weight_total > 0.0 {
            (Some(round2(weighted_sum / weight_total)), failed)
        } else {
            (None, failed)
        }
    }
}
