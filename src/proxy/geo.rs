//! Geolocation and anonymity classification of exit IPs

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::concurrency::RateLimiter;
use crate::error::Result;
use crate::models::{Anonymity, GeoInfo};
use crate::proxy::probe::Prober;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    country: Option<String>,
    country_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
    isp: Option<String>,
    org: Option<String>,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    hosting: bool,
}

#[derive(Debug, Deserialize)]
struct IpApiCoResponse {
    country_name: Option<String>,
    country_code: Option<String>,
    region: Option<String>,
    city: Option<String>,
    org: Option<String>,
}

impl From<IpApiResponse> for GeoInfo {
    fn from(r: IpApiResponse) -> Self {
        GeoInfo {
            country: r.country,
            country_code: r.country_code,
            region: r.region,
            city: r.city,
            isp: r.isp,
            org: r.org,
            anonymity: if r.proxy {
                Anonymity::Transparent
            } else {
                Anonymity::Elite
            },
            is_hosting: r.hosting,
        }
    }
}

impl From<IpApiCoResponse> for GeoInfo {
    fn from(r: IpApiCoResponse) -> Self {
        GeoInfo {
            country: r.country_name,
            country_code: r.country_code,
            region: r.region,
            city: r.city,
            isp: r.org.clone(),
            org: r.org,
            anonymity: Anonymity::Anonymous,
            is_hosting: false,
        }
    }
}

/// Looks up exit IPs directly, not through the proxy under test
pub struct GeoLocator {
    prober: Arc<dyn Prober>,
    limiter: RateLimiter,
    timeout: Duration,
}

impl GeoLocator {
    pub fn new(prober: Arc<dyn Prober>, limiter: RateLimiter) -> Self {
        Self {
            prober,
            limiter,
            timeout: Duration::from_secs(5),
        }
    }

    /// ip-api first, then ipapi.co; an all-unknown record when both fail
    pub async fn locate(&self, ip: &str) -> GeoInfo {
        match self.from_ip_api(ip).await {
            Ok(Some(geo)) => return geo,
            Ok(None) => {}
            Err(e) => debug!(ip, error = %e, "ip-api lookup failed"),
        }

        match self.from_ipapi_co(ip).await {
            Ok(Some(geo)) => return geo,
            Ok(None) => {}
            Err(e) => debug!(ip, error = %e, "ipapi.co lookup failed"),
        }

        GeoInfo::default()
    }

    async fn from_ip_api(&self, ip: &str) -> Result<Option<GeoInfo>> {
        let url = format!(
            "http://ip-api.com/json/{}?fields=status,country,countryCode,region,city,isp,org,as,proxy,hosting",
            ip
        );
        self.limiter.admit().await;
        let response = self.prober.lookup(&url, self.timeout).await?;
        if response.status != 200 {
            return Ok(None);
        }

        let body: IpApiResponse = serde_json::from_slice(&response.body)?;
        Ok((body.status == "success").then(|| body.into()))
    }

    async fn from_ipapi_co(&self, ip: &str) -> Result<Option<GeoInfo>> {
        let url = format!("https://ipapi.co/{}/json/", ip);
        self.limiter.admit().await;
        let response = self.prober.lookup(&url, self.timeout).await?;
        if response.status != 200 {
            return Ok(None);
        }

        let body: IpApiCoResponse = serde_json::from_slice(&response.body)?;
        Ok(body.country_name.is_some().then(|| body.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SiftError;
    use crate::models::{ProxyAddress, ProxyProtocol};
    use crate::proxy::probe::FetchResponse;
    use async_trait::async_trait;

    struct LookupProber {
        ip_api: Option<&'static str>,
        ipapi_co: Option<&'static str>,
    }

    fn ok(body: &str) -> Result<FetchResponse> {
        Ok(FetchResponse {
            status: 200,
            body: body.as_bytes().to_vec(),
            content_length: None,
            elapsed: Duration::from_millis(20),
        })
    }

    #[async_trait]
    impl Prober for LookupProber {
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
            _url: &str,
            _timeout: Duration,
            _verify_tls: bool,
        ) -> Result<FetchResponse> {
            unreachable!()
        }

        async fn lookup(&self, url: &str, _timeout: Duration) -> Result<FetchResponse> {
            let body = if url.contains("ip-api.com") {
                self.ip_api
            } else {
                self.ipapi_co
            };
            match body {
                Some(body) => ok(body),
                None => Err(SiftError::TransientTransport("timeout".into())),
            }
        }
    }

    fn locator(ip_api: Option<&'static str>, ipapi_co: Option<&'static str>) -> GeoLocator {
        GeoLocator::new(
            Arc::new(LookupProber { ip_api, ipapi_co }),
            RateLimiter::new(100, None),
        )
    }

    #[tokio::test]
    async fn test_ip_api_success_classifies_anonymity() {
        let geo = locator(
            Some(r#"{"status":"success","country":"Germany","countryCode":"DE","city":"Berlin","isp":"Hetzner","org":"Hetzner","proxy":false,"hosting":true}"#),
            None,
        )
        .locate("198.51.100.7")
        .await;

        assert_eq!(geo.country_code.as_deref(), Some("DE"));
        assert_eq!(geo.anonymity, Anonymity::Elite);
        assert!(geo.is_hosting);

        let geo = locator(Some(r#"{"status":"success","proxy":true}"#), None)
            .locate("198.51.100.7")
            .await;
        assert_eq!(geo.anonymity, Anonymity::Transparent);
    }

    #[tokio::test]
    async fn test_falls_back_to_ipapi_co() {
        let geo = locator(
            Some(r#"{"status":"fail","message":"reserved range"}"#),
            Some(r#"{"country_name":"France","country_code":"FR","org":"OVH"}"#),
        )
        .locate("198.51.100.7")
        .await;

        assert_eq!(geo.country.as_deref(), Some("France"));
        assert_eq!(geo.isp.as_deref(), Some("OVH"));
        assert_eq!(geo.anonymity, Anonymity::Anonymous);
    }

    #[tokio::test]
    async fn test_unknown_when_both_fail() {
        let geo = locator(None, Some(r#"{"error":true,"reason":"RateLimited"}"#))
            .locate("198.51.100.7")
            .await;
        assert_eq!(geo, GeoInfo::default());
        assert_eq!(geo.anonymity, Anonymity::Unknown);
    }
}
