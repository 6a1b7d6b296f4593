use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Named speed-test rigor level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    Fast,
    #[default]
    Normal,
    Thorough,
}

impl CheckLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckLevel::Fast => "fast",
            CheckLevel::Normal => "normal",
            CheckLevel::Thorough => "thorough",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fast" => Some(CheckLevel::Fast),
            "normal" => Some(CheckLevel::Normal),
            "thorough" => Some(CheckLevel::Thorough),
            _ => None,
        }
    }

    pub fn preset(&self) -> CheckLevelPreset {
        match self {
            CheckLevel::Fast => CheckLevelPreset {
                max_tests: 2,
                min_speed_mbps: 1.0,
            },
            CheckLevel::Normal => CheckLevelPreset {
                max_tests: 3,
                min_speed_mbps: 2.0,
            },
            CheckLevel::Thorough => CheckLevelPreset {
                max_tests: 5,
                min_speed_mbps: 3.0,
            },
        }
    }
}

impl std::fmt::Display for CheckLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Thresholds applied by the speed test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckLevelPreset {
    pub max_tests: usize,
    pub min_speed_mbps: f64,
}

/// Weighted endpoint used to measure throughput through a proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEndpoint {
    pub url: String,
    pub weight: f64,
    pub timeout: Duration,
    pub verify_tls: bool,
}

impl TestEndpoint {
    pub fn new(url: &str, weight: f64, timeout_secs: u64) -> Self {
        Self {
            url: url.to_string(),
            weight,
            timeout: Duration::from_secs(timeout_secs),
            verify_tls: false,
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            TestEndpoint::new("http://www.google.com", 1.0, 10),
            TestEndpoint::new("http://www.facebook.com", 1.0, 10),
            TestEndpoint::new("http://www.youtube.com", 2.0, 15),
        ]
    }
}

/// IP-echo service used to discover a proxy's exit address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityEndpoint {
    pub url: String,
    /// JSON field holding the exit IP
    pub ip_key: String,
    /// JSON field holding the country code, when the service reports one
    pub country_key: Option<String>,
    pub timeout: Duration,
    pub weight: f64,
}

impl IdentityEndpoint {
    pub fn new(url: &str, ip_key: &str, country_key: Option<&str>, timeout_secs: u64, weight: f64) -> Self {
        Self {
            url: url.to_string(),
            ip_key: ip_key.to_string(),
            country_key: country_key.map(str::to_string),
            timeout: Duration::from_secs(timeout_secs),
            weight,
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            IdentityEndpoint::new("http://ip-api.com/json", "query", Some("countryCode"), 5, 1.0),
            IdentityEndpoint::new("https://ipapi.co/json", "ip", Some("country_code"), 6, 3.0),
            IdentityEndpoint::new("https://httpbin.org/ip", "origin", None, 6, 2.0),
            IdentityEndpoint::new("https://api.ipify.org?format=json", "ip", None, 5, 3.0),
            IdentityEndpoint::new("https://ipinfo.io/json", "ip", Some("country"), 7, 2.0),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_level_presets() {
        assert_eq!(CheckLevel::Fast.preset().max_tests, 2);
        assert_eq!(CheckLevel::Fast.preset().min_speed_mbps, 1.0);
        assert_eq!(CheckLevel::Normal.preset().max_tests, 3);
        assert_eq!(CheckLevel::Normal.preset().min_speed_mbps, 2.0);
        assert_eq!(CheckLevel::Thorough.preset().max_tests, 5);
        assert_eq!(CheckLevel::Thorough.preset().min_speed_mbps, 3.0);
    }

    #[test]
    fn test_check_level_parsing() {
        assert_eq!(CheckLevel::from_str("FAST"), Some(CheckLevel::Fast));
        assert_eq!(CheckLevel::from_str("thorough"), Some(CheckLevel::Thorough));
        assert_eq!(CheckLevel::from_str("extreme"), None);
        assert_eq!(CheckLevel::default(), CheckLevel::Normal);
    }

    #[test]
    fn test_default_endpoints() {
        let tests = TestEndpoint::defaults();
        assert_eq!(tests.len(), 3);
        assert_eq!(tests[2].weight, 2.0);
        assert_eq!(tests[2].timeout, Duration::from_secs(15));

        let identity = IdentityEndpoint::defaults();
        assert_eq!(identity.len(), 5);
        assert_eq!(identity[0].ip_key, "query");
        assert!(identity[2].country_key.is_none());
    }
}
