//! Header anonymity audit
//!
//! Requests a header echo service through the proxy and reports any forwarding headers
//! the proxy added. A proxy that adds one exposes the client and is treated as transparent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::concurrency::RateLimiter;
use crate::models::{ProxyAddress, ProxyProtocol};
use crate::proxy::probe::Prober;

pub const HEADER_ECHO_URL: &str = "https://httpbin.org/headers";

/// Headers that reveal the client or the presence of a proxy
pub const REVEALING_HEADERS: [&str; 4] = ["X-Forwarded-For", "Via", "Forwarded", "X-Real-IP"];

#[derive(Debug, Deserialize)]
struct EchoedHeaders {
    headers: HashMap<String, serde_json::Value>,
}

/// Revealing headers present in an echo service body, `None` if the body is not an echo
pub fn revealing_headers(body: &[u8]) -> Option<Vec<String>> {
    let echoed: EchoedHeaders = serde_json::from_slice(body).ok()?;
    let mut leaked: Vec<String> = REVEALING_HEADERS
        .iter()
        .filter(|name| echoed.headers.keys().any(|k| k.eq_ignore_ascii_case(name)))
        .map(|name| name.to_string())
        .collect();
    leaked.sort();
    Some(leaked)
}

pub struct HeaderAuditor {
    prober: Arc<dyn Prober>,
    limiter: RateLimiter,
    url: String,
    timeout: Duration,
}

impl HeaderAuditor {
    pub fn new(prober: Arc<dyn Prober>, limiter: RateLimiter) -> Self {
        Self {
            prober,
            limiter,
            url: HEADER_ECHO_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Revealing headers seen by the echo service, `None` when the audit could not complete
    pub async fn audit(&self, proxy: &ProxyAddress, via: ProxyProtocol) -> Option<Vec<String>> {
        self.limiter.admit().await;
        let response = match self
            .prober
            .fetch(proxy, via, &self.url, self.timeout, true)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(proxy = %proxy, error = %e, "Header audit failed");
                return None;
            }
        };

        if response.status != 200 {
            debug!(proxy = %proxy, status = response.status, "Header echo refused");
            return None;
        }

        let leaked = revealing_headers(&response.body);
        if let Some(leaked) = leaked.as_ref().filter(|l| !l.is_empty()) {
            debug!(proxy = %proxy, leaked = ?leaked, "Proxy forwards identifying headers");
        }
        leaked
    }
}
