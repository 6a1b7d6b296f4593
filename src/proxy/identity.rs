//! Exit-IP discovery through a validated proxy
//!
//! Several IP-echo services are queried through the proxy; timeouts scale with the
//! proxy protocol, a coarse region guess from the address prefix, and the attempt number.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::concurrency::RateLimiter;
use crate::error::{Result, SiftError};
use crate::models::{Identity, IdentityEndpoint, ProxyAddress, ProxyProtocol};
use crate::proxy::probe::Prober;

pub const MAX_IDENTITY_TIMEOUT: Duration = Duration::from_secs(20);

/// Reported when an echo service gives no country
pub const UNKNOWN_COUNTRY: &str = "?";

pub fn protocol_multiplier(protocol: ProxyProtocol) -> f64 {
    match protocol {
        ProxyProtocol::Socks4 => 1.5,
        ProxyProtocol::Socks5 => 1.4,
        ProxyProtocol::Https => 1.3,
        ProxyProtocol::Http => 1.2,
    }
}

/// Region guess from the leading octet
pub fn region_multiplier(host: &str) -> f64 {
    const FAST: &[&str] = &["1.", "8.", "208."];
    const MODERATE: &[&str] = &["46.", "85.", "91."];
    const DISTANT: &[&str] = &["103.", "118.", "202."];

    if FAST.iter().any(|p| host.starts_with(p)) {
        1.0
    } else if MODERATE.iter().any(|p| host.starts_with(p)) {
        1.2
    } else if DISTANT.iter().any(|p| host.starts_with(p)) {
        1.5
    } else {
        1.3
    }
}

pub fn attempt_multiplier(attempt: u32) -> f64 {
    1.0 + 0.7 * attempt as f64
}

pub fn dynamic_timeout(base: Duration, protocol: ProxyProtocol, host: &str, attempt: u32) -> Duration {
    let scaled = base.as_secs_f64()
        * protocol_multiplier(protocol)
        * region_multiplier(host)
        * attempt_multiplier(attempt);
    Duration::from_secs_f64(scaled).min(MAX_IDENTITY_TIMEOUT)
}

/// `0.3 * 2^attempt` seconds plus up to 200ms of jitter
pub fn backoff<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let base = 0.3 * 2f64.powi(attempt as i32);
    Duration::from_secs_f64(base + rng.gen_range(0.0..0.2))
}

/// Order endpoints by `weight * U(0.8, 1.2)`, heaviest first
pub fn shuffle_endpoints<R: Rng + ?Sized>(
    endpoints: &[IdentityEndpoint],
    rng: &mut R,
) -> Vec<IdentityEndpoint> {
    let mut keyed: Vec<(f64, IdentityEndpoint)> = endpoints
        .iter()
        .map(|ep| (ep.weight * rng.gen_range(0.8..1.2), ep.clone()))
        .collect();
    keyed.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    keyed.into_iter().map(|(_, ep)| ep).collect()
}

/// Highest weight wins, then lowest latency
pub fn best_identity(candidates: Vec<Identity>) -> Option<Identity> {
    candidates.into_iter().max_by(|a, b| {
        a.weight
            .partial_cmp(&b.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.response_time_ms
                    .partial_cmp(&a.response_time_ms)
                    .unwrap_or(Ordering::Equal)
            })
    })
}

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub endpoints: Vec<IdentityEndpoint>,
    pub max_retries: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            endpoints: IdentityEndpoint::defaults(),
            max_retries: 3,
        }
    }
}

/// Resolves the exit IP a proxy presents to the outside world
pub struct IdentityResolver {
    prober: Arc<dyn Prober>,
    limiter: RateLimiter,
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(prober: Arc<dyn Prober>, limiter: RateLimiter, config: IdentityConfig) -> Self {
        Self {
            prober,
            limiter,
            config,
        }
    }

    #[instrument(skip(self), fields(proxy = %proxy))]
    pub async fn resolve(&self, proxy: &ProxyAddress, via: ProxyProtocol) -> Option<Identity> {
        // first attempt plus `max_retries` retries
        for attempt in 0..=self.config.max_retries {
            let order = shuffle_endpoints(&self.config.endpoints, &mut rand::thread_rng());

            let lookups = order
                .iter()
                .map(|endpoint| self.query(proxy, via, endpoint, attempt));
            let found: Vec<Identity> = futures::future::join_all(lookups)
                .await
                .into_iter()
                .filter_map(|outcome| match outcome {
                    Ok(identity) => Some(identity),
                    Err(e) => {
                        debug!(error = %e, kind = %e.kind(), "Identity endpoint skipped");
                        None
                    }
                })
                .collect();

            if let Some(best) = best_identity(found) {
                debug!(ip = %best.ip, endpoint = %best.endpoint, attempt, "Identity resolved");
                return Some(best);
            }

            if attempt < self.config.max_retries {
                let delay = backoff(attempt, &mut rand::thread_rng());
                tokio::time::sleep(delay).await;
            }
        }

        None
    }

    async fn query(
        &self,
        proxy: &ProxyAddress,
        via: ProxyProtocol,
        endpoint: &IdentityEndpoint,
        attempt: u32,
    ) -> Result<Identity> {
        let timeout = dynamic_timeout(endpoint.timeout, proxy.protocol_hint(), &proxy.host, attempt);

        self.limiter.admit().await;
        let response = self
            .prober
            .fetch(proxy, via, &endpoint.url, timeout, true)
            .await?;

        match response.status {
            200 => {}
            429 | 403 => {
                return Err(SiftError::RateLimited {
                    endpoint: endpoint.url.clone(),
                    status: response.status,
                })
            }
            status => {
                return Err(SiftError::UnexpectedStatus {
                    url: endpoint.url.clone(),
                    status,
                })
            }
        }

        let body = response.json()?;
        let ip = body
            .get(&endpoint.ip_key)
            .and_then(|v| v.as_str())
            // httpbin reports a comma-separated chain
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                SiftError::Http(format!("{} has no {} field", endpoint.url, endpoint.ip_key))
            })?;

        let country = endpoint
            .country_key
            .as_ref()
            .and_then(|key| body.get(key))
            .and_then(|v| v.as_str())
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN_COUNTRY)
            .to_string();

        Ok(Identity {
            ip,
            country,
            response_time_ms: response.elapsed.as_secs_f64() * 1000.0,
            endpoint: endpoint.url.clone(),
            weight: endpoint.weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::probe::FetchResponse;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    #[test]
    fn test_dynamic_timeout_tables() {
        let base = Duration::from_secs(5);
        let t = dynamic_timeout(base, ProxyProtocol::Http, "1.2.3.4", 0);
        assert!((t.as_secs_f64() - 6.0).abs() < 1e-9);

        let t = dynamic_timeout(base, ProxyProtocol::Socks5, "46.1.1.1", 1);
        assert!((t.as_secs_f64() - 5.0 * 1.4 * 1.2 * 1.7).abs() < 1e-9);

        let t = dynamic_timeout(base, ProxyProtocol::Socks4, "103.1.1.1", 3);
        assert_eq!(t, MAX_IDENTITY_TIMEOUT);

        assert_eq!(region_multiplier("77.0.0.1"), 1.3);
    }

    #[test]
    fn test_backoff_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..4 {
            let d = backoff(attempt, &mut rng).as_secs_f64();
            let base = 0.3 * 2f64.powi(attempt as i32);
            assert!(d >= base && d < base + 0.2);
        }
    }

    #[test]
    fn test_shuffle_keeps_all_endpoints() {
        let endpoints = IdentityEndpoint::defaults();
        let mut rng = StdRng::seed_from_u64(42);
        let shuffled = shuffle_endpoints(&endpoints, &mut rng);
        assert_eq!(shuffled.len(), endpoints.len());
        for ep in &endpoints {
            assert!(shuffled.contains(ep));
        }
        // weight 1 can never outrank weight 3 under a +/-20% jitter
        assert!(shuffled[shuffled.len() - 1].weight <= 2.0);
    }

    #[test]
    fn test_best_identity_prefers_weight_then_latency() {
        let id = |ip: &str, weight: f64, ms: f64| Identity {
            ip: ip.to_string(),
            country: "?".to_string(),
            response_time_ms: ms,
            endpoint: String::new(),
            weight,
        };

        let best = best_identity(vec![id("a", 1.0, 10.0), id("b", 3.0, 900.0), id("c", 3.0, 200.0)]);
        assert_eq!(best.unwrap().ip, "c");
        assert!(best_identity(vec![]).is_none());
    }

    /// Answers identity fetches from a url -> (status, body) table
    struct TableProber {
        table: HashMap<String, (u16, String)>,
        calls: Mutex<Vec<String>>,
        verified: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl Prober for TableProber {
        async fn ping(&self, _host: &str, _timeout: Duration) -> Result<Duration> {
            unreachable!()
        }

        async fn probe_protocol(
            &self,
            _proxy: &ProxyAddress,
            _protocol: ProxyProtocol,
            _timeout: Duration,
        ) -> Result<()> {
            unreachable!()
        }

        async fn fetch(
            &self,
            _proxy: &ProxyAddress,
            _via: ProxyProtocol,
            url: &str,
            _timeout: Duration,
            verify_tls: bool,
        ) -> Result<FetchResponse> {
            self.calls.lock().push(url.to_string());
            self.verified.lock().push(verify_tls);
            match self.table.get(url) {
                Some((status, body)) => Ok(FetchResponse {
                    status: *status,
                    body: body.clone().into_bytes(),
                    content_length: None,
                    elapsed: Duration::from_millis(100),
                }),
                None => Err(SiftError::TransientTransport("connection reset".into())),
            }
        }

        async fn lookup(&self, _url: &str, _timeout: Duration) -> Result<FetchResponse> {
            unreachable!()
        }
    }

    fn resolver(table: HashMap<String, (u16, String)>, max_retries: u32) -> (IdentityResolver, Arc<TableProber>) {
        let prober = Arc::new(TableProber {
            table,
            calls: Mutex::new(Vec::new()),
            verified: Mutex::new(Vec::new()),
        });
        let resolver = IdentityResolver::new(
            prober.clone(),
            RateLimiter::new(1_000, None),
            IdentityConfig {
                endpoints: IdentityEndpoint::defaults(),
                max_retries,
            },
        );
        (resolver, prober)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_endpoints_are_skipped() {
        let mut table = HashMap::new();
        table.insert(
            "https://ipapi.co/json".to_string(),
            (429, "{}".to_string()),
        );
        table.insert(
            "http://ip-api.com/json".to_string(),
            (200, r#"{"query":"198.51.100.7","countryCode":"DE"}"#.to_string()),
        );
        table.insert(
            "https://httpbin.org/ip".to_string(),
            (200, r#"{"origin":"198.51.100.7, 10.0.0.1"}"#.to_string()),
        );

        let (resolver, _) = resolver(table, 3);
        let proxy = ProxyAddress::parse("203.0.113.5:8080").unwrap();
        let identity = resolver.resolve(&proxy, ProxyProtocol::Http).await.unwrap();

        // httpbin carries weight 2, ip-api weight 1
        assert_eq!(identity.endpoint, "https://httpbin.org/ip");
        assert_eq!(identity.ip, "198.51.100.7");
        assert_eq!(identity.country, UNKNOWN_COUNTRY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_endpoints_failing_retries_then_gives_up() {
        let (resolver, prober) = resolver(HashMap::new(), 2);
        let proxy = ProxyAddress::parse("203.0.113.5:8080").unwrap();

        assert!(resolver.resolve(&proxy, ProxyProtocol::Http).await.is_none());
        // one initial round plus two retries
        assert_eq!(prober.calls.lock().len(), 3 * IdentityEndpoint::defaults().len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_retry_still_makes_a_second_round() {
        let (resolver, prober) = resolver(HashMap::new(), 1);
        let proxy = ProxyAddress::parse("203.0.113.5:8080").unwrap();

        assert!(resolver.resolve(&proxy, ProxyProtocol::Http).await.is_none());
        assert_eq!(prober.calls.lock().len(), 2 * IdentityEndpoint::defaults().len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_makes_exactly_one_round() {
        let (resolver, prober) = resolver(HashMap::new(), 0);
        let proxy = ProxyAddress::parse("203.0.113.5:8080").unwrap();

        assert!(resolver.resolve(&proxy, ProxyProtocol::Http).await.is_none());
        assert_eq!(prober.calls.lock().len(), IdentityEndpoint::defaults().len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_lookups_verify_certificates() {
        let (resolver, prober) = resolver(HashMap::new(), 0);
        let proxy = ProxyAddress::parse("203.0.113.5:8080").unwrap();

        resolver.resolve(&proxy, ProxyProtocol::Http).await;
        let verified = prober.verified.lock();
        assert!(!verified.is_empty());
        assert!(verified.iter().all(|v| *v));
    }
}
