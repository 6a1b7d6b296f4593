//! Network probes used by the validator
//!
//! The `Prober` trait is the seam between the validation state machine and the network,
//! so tests can script every call.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, SiftError};
use crate::models::{ProxyAddress, ProxyProtocol};
use crate::proxy::transport::ProxyTransport;

/// Host used for protocol detection tunnels
pub const PROBE_TARGET: &str = "www.google.com";

/// Response of a GET issued through a proxy or directly
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// `Content-Length` header, when present
    pub content_length: Option<u64>,
    pub elapsed: Duration,
}

impl FetchResponse {
    /// Size used for throughput: the declared length, else the body length
    pub fn size_bytes(&self) -> u64 {
        self.content_length.unwrap_or(self.body.len() as u64)
    }

    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    /// Direct reachability check against the proxy host; returns the round-trip time
    async fn ping(&self, host: &str, timeout: Duration) -> Result<Duration>;

    /// Minimal request through `proxy` speaking `protocol`
    async fn probe_protocol(
        &self,
        proxy: &ProxyAddress,
        protocol: ProxyProtocol,
        timeout: Duration,
    ) -> Result<()>;

    /// GET `url` through `proxy`, which is addressed as `via`
    async fn fetch(
        &self,
        proxy: &ProxyAddress,
        via: ProxyProtocol,
        url: &str,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<FetchResponse>;

    /// GET `url` without any proxy
    async fn lookup(&self, url: &str, timeout: Duration) -> Result<FetchResponse>;
}

/// Prober backed by reqwest and raw tunnels
#[derive(Debug, Clone, Default)]
pub struct HttpProber;

impl HttpProber {
    pub fn new() -> Self {
        Self
    }

    /// Proxy URL reqwest should use when tunnelling as `via`
    fn proxy_url(proxy: &ProxyAddress, via: ProxyProtocol) -> String {
        match via {
            ProxyProtocol::Socks5 => proxy.url_with_scheme("socks5h"),
            _ => proxy.url_with_scheme("http"),
        }
    }

    async fn read_response(response: reqwest::Response, started: Instant) -> Result<FetchResponse> {
        let status = response.status().as_u16();
        let content_length = response.content_length();
        let body = response.bytes().await?.to_vec();

        Ok(FetchResponse {
            status,
            body,
            content_length,
            elapsed: started.elapsed(),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn ping(&self, host: &str, timeout: Duration) -> Result<Duration> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let target = url::Url::parse(&format!("http://{}/", host))?;
        let started = Instant::now();
        let response = client.head(target).send().await?;
        debug!(host, status = response.status().as_u16(), "Ping answered");

        Ok(started.elapsed())
    }

    async fn probe_protocol(
        &self,
        proxy: &ProxyAddress,
        protocol: ProxyProtocol,
        probe_timeout: Duration,
    ) -> Result<()> {
        let attempt = async {
            let status_line = match protocol {
                // A 200 to CONNECT on 443 is enough to prove TLS tunnelling.
                ProxyProtocol::Https => {
                    ProxyTransport::connect(proxy, protocol, PROBE_TARGET, 443).await?;
                    return Ok(());
                }
                ProxyProtocol::Http => ProxyTransport::forward_head(proxy, PROBE_TARGET).await?,
                ProxyProtocol::Socks4 | ProxyProtocol::Socks5 => {
                    let mut stream = ProxyTransport::connect(proxy, protocol, PROBE_TARGET, 80).await?;
                    ProxyTransport::head(&mut stream, PROBE_TARGET).await?
                }
            };

            if status_line.starts_with("HTTP/") {
                Ok(())
            } else {
                Err(SiftError::ProxyConnectionFailed(format!(
                    "unexpected response through {}: {}",
                    protocol, status_line
                )))
            }
        };

        timeout(probe_timeout, attempt).await?
    }

    async fn fetch(
        &self,
        proxy: &ProxyAddress,
        via: ProxyProtocol,
        url: &str,
        timeout: Duration,
        verify_tls: bool,
    ) -> Result<FetchResponse> {
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(Self::proxy_url(proxy, via))?)
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(timeout)
            .build()?;

        let started = Instant::now();
        let response = client.get(url).send().await?;
        Self::read_response(response, started).await
    }

    async fn lookup(&self, url: &str, timeout: Duration) -> Result<FetchResponse> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()?;

        let started = Instant::now();
        let response = client.get(url).send().await?;
        Self::read_response(response, started).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_url_per_protocol() {
        let proxy = ProxyAddress::parse("u:p@10.0.0.1:1080").unwrap();
        assert_eq!(
            HttpProber::proxy_url(&proxy, ProxyProtocol::Socks5),
            "socks5h://u:p@10.0.0.1:1080"
        );
        assert_eq!(
            HttpProber::proxy_url(&proxy, ProxyProtocol::Https),
            "http://u:p@10.0.0.1:1080"
        );
        assert_eq!(
            HttpProber::proxy_url(&proxy, ProxyProtocol::Socks4),
            "http://u:p@10.0.0.1:1080"
        );
    }

    #[tokio::test]
    async fn test_http_detected_on_forward_only_proxy() {
        let port = crate::proxy::transport::tests::spawn_forward_only_proxy().await;
        let proxy = ProxyAddress::parse(&format!("127.0.0.1:{}", port)).unwrap();
        let prober = HttpProber::new();

        prober
            .probe_protocol(&proxy, ProxyProtocol::Http, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(prober
            .probe_protocol(&proxy, ProxyProtocol::Https, Duration::from_secs(2))
            .await
            .is_err());
    }

    #[test]
    fn test_fetch_response_size_prefers_content_length() {
        let mut response = FetchResponse {
            status: 200,
            body: vec![0u8; 10],
            content_length: Some(1_000),
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(response.size_bytes(), 1_000);

        response.content_length = None;
        assert_eq!(response.size_bytes(), 10);
    }
}
