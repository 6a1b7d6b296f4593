//! Filtering, ordering and bucketing of live proxies

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::models::{Anonymity, ProxyProtocol, ProxyReport};
use crate::scoring::trend::{QualityTrend, TrendLabel};

/// Optional post-validation filter over live results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFilter {
    pub max_response_time_ms: f64,
    pub min_health_score: u8,
    pub blacklist_countries: Vec<String>,
    pub preferred_countries: Vec<String>,
    pub preferred_anonymity: Vec<Anonymity>,
    pub exclude_hosting: bool,
    pub min_speed_mbps: f64,
    pub excluded_protocols: Vec<ProxyProtocol>,
}

impl Default for ResultFilter {
    fn default() -> Self {
        Self {
            max_response_time_ms: 1000.0,
            min_health_score: 60,
            blacklist_countries: vec!["CN".to_string(), "RU".to_string()],
            preferred_countries: vec![
                "US".to_string(),
                "UK".to_string(),
                "DE".to_string(),
                "FR".to_string(),
            ],
            preferred_anonymity: vec![Anonymity::Elite, Anonymity::Anonymous],
            exclude_hosting: false,
            min_speed_mbps: 0.5,
            excluded_protocols: Vec::new(),
        }
    }
}

impl ResultFilter {
    pub fn accepts(&self, report: &ProxyReport) -> bool {
        let country = match (&report.ip, &report.country) {
            (Some(_), Some(country)) => country,
            _ => return false,
        };

        if report.latency_ms.unwrap_or(f64::MAX) > self.max_response_time_ms {
            return false;
        }
        if report.health_score < self.min_health_score {
            return false;
        }
        if contains_ignore_case(&self.blacklist_countries, country) {
            return false;
        }
        if !self.preferred_countries.is_empty()
            && !contains_ignore_case(&self.preferred_countries, country)
        {
            return false;
        }

        if let Some(geo) = &report.geo {
            if !self.preferred_anonymity.is_empty()
                && !self.preferred_anonymity.contains(&geo.anonymity)
            {
                return false;
            }
            if self.exclude_hosting && geo.is_hosting {
                return false;
            }
        }

        if let Some(speed) = report.speed_mbps {
            if speed < self.min_speed_mbps {
                return false;
            }
        }

        if !self.excluded_protocols.is_empty()
            && report
                .protocols
                .iter()
                .all(|p| self.excluded_protocols.contains(p))
        {
            return false;
        }

        true
    }

    pub fn apply(&self, reports: Vec<ProxyReport>) -> Vec<ProxyReport> {
        reports.into_iter().filter(|r| self.accepts(r)).collect()
    }
}

fn contains_ignore_case(list: &[String], value: &str) -> bool {
    list.iter().any(|item| item.eq_ignore_ascii_case(value))
}

/// Order by health score descending, then latency ascending
pub fn sort_by_quality(reports: &mut [ProxyReport]) {
    reports.sort_by(|a, b| {
        b.health_score.cmp(&a.health_score).then_with(|| {
            let la = a.latency_ms.unwrap_or(f64::MAX);
            let lb = b.latency_ms.unwrap_or(f64::MAX);
            la.partial_cmp(&lb).unwrap_or(Ordering::Equal)
        })
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceCategory {
    Premium,
    Good,
    Average,
    Poor,
}

/// Bucket a live proxy by `0.7 * health + 0.3 * reliability` and its trend
pub fn categorize(health_score: u8, trend: &QualityTrend) -> PerformanceCategory {
    let final_score = health_score as f64 * 0.7 + trend.reliability_score * 0.3;
    let improving = trend.label == TrendLabel::Improving;

    if final_score >= 80.0 && trend.label != TrendLabel::Degrading {
        PerformanceCategory::Premium
    } else if final_score >= 60.0 || (improving && final_score >= 50.0) {
        PerformanceCategory::Good
    } else if final_score >= 40.0 || improving {
        PerformanceCategory::Average
    } else {
        PerformanceCategory::Poor
    }
}

/// Ranked output record with its performance bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedProxy {
    #[serde(flatten)]
    pub report: ProxyReport,
    pub category: PerformanceCategory,
    pub trend: QualityTrend,
    pub stability: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub premium: usize,
    pub good: usize,
    pub average: usize,
    pub poor: usize,
}

impl CategoryCounts {
    pub fn tally(ranked: &[RankedProxy]) -> Self {
        let mut counts = Self::default();
        for item in ranked {
            match item.category {
                PerformanceCategory::Premium => counts.premium += 1,
                PerformanceCategory::Good => counts.good += 1,
                PerformanceCategory::Average => counts.average += 1,
                PerformanceCategory::Poor => counts.poor += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeoInfo, ProtocolSet, ProxyStatus};

    fn report(score: u8, latency: f64, country: &str) -> ProxyReport {
        let mut protocols = ProtocolSet::new();
        protocols.insert(ProxyProtocol::Http);
        ProxyReport {
            proxy: format!("192.0.2.{}:8080", score),
            ip: Some("198.51.100.9".to_string()),
            country: Some(country.to_string()),
            latency_ms: Some(latency),
            speed_mbps: Some(3.0),
            protocols,
            status: ProxyStatus::Working,
            geo: Some(GeoInfo {
                country_code: Some(country.to_string()),
                anonymity: Anonymity::Elite,
                ..GeoInfo::default()
            }),
            anonymity: Anonymity::Elite,
            health_score: score,
        }
    }

    fn trend(reliability_score: f64, label: TrendLabel) -> QualityTrend {
        QualityTrend {
            reliability_score,
            label,
        }
    }

    #[test]
    fn test_default_filter() {
        let filter = ResultFilter::default();
        assert!(filter.accepts(&report(80, 300.0, "US")));
        assert!(!filter.accepts(&report(80, 300.0, "CN")));
        assert!(!filter.accepts(&report(80, 300.0, "BR")));
        assert!(!filter.accepts(&report(50, 300.0, "US")));
        assert!(!filter.accepts(&report(80, 1500.0, "US")));

        let mut no_ip = report(80, 300.0, "US");
        no_ip.ip = None;
        assert!(!filter.accepts(&no_ip));
    }

    #[test]
    fn test_filter_geo_and_protocol_rules() {
        let filter = ResultFilter {
            preferred_countries: Vec::new(),
            exclude_hosting: true,
            excluded_protocols: vec![ProxyProtocol::Http],
            ..ResultFilter::default()
        };

        let mut hosted = report(80, 300.0, "BR");
        hosted.protocols.insert(ProxyProtocol::Socks5);
        assert!(filter.accepts(&hosted));
        hosted.geo.as_mut().unwrap().is_hosting = true;
        assert!(!filter.accepts(&hosted));

        // only an excluded protocol left
        assert!(!filter.accepts(&report(80, 300.0, "BR")));

        let mut transparent = report(80, 300.0, "BR");
        transparent.protocols.insert(ProxyProtocol::Socks4);
        transparent.geo.as_mut().unwrap().anonymity = Anonymity::Transparent;
        assert!(!filter.accepts(&transparent));
    }

    #[test]
    fn test_sort_by_quality() {
        let mut reports = vec![
            report(70, 100.0, "US"),
            report(90, 400.0, "US"),
            report(90, 200.0, "DE"),
        ];
        sort_by_quality(&mut reports);
        assert_eq!(reports[0].country.as_deref(), Some("DE"));
        assert_eq!(reports[1].latency_ms, Some(400.0));
        assert_eq!(reports[2].health_score, 70);
    }

    #[test]
    fn test_categorize() {
        assert_eq!(
            categorize(100, &trend(90.0, TrendLabel::Stable)),
            PerformanceCategory::Premium
        );
        // 97 final but degrading
        assert_eq!(
            categorize(100, &trend(90.0, TrendLabel::Degrading)),
            PerformanceCategory::Good
        );
        // 0.7*70 = 49 + 0.3*10 = 52, improving
        assert_eq!(
            categorize(70, &trend(10.0, TrendLabel::Improving)),
            PerformanceCategory::Good
        );
        assert_eq!(
            categorize(60, &trend(0.0, TrendLabel::Stable)),
            PerformanceCategory::Average
        );
        assert_eq!(
            categorize(10, &trend(0.0, TrendLabel::Improving)),
            PerformanceCategory::Average
        );
        assert_eq!(
            categorize(30, &trend(0.0, TrendLabel::Fluctuating)),
            PerformanceCategory::Poor
        );
    }
}
