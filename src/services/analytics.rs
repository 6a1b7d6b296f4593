//! Streaming counters over completed validations

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

use crate::models::{Anonymity, ValidationResult};

/// Recent health scores kept for the rolling mean
pub const RECENT_SCORES_CAP: usize = 1000;

#[derive(Debug, Default)]
struct Counters {
    total_checked: u64,
    live_count: u64,
    dead_count: u64,
    countries: HashMap<String, u64>,
    anonymity: HashMap<Anonymity, u64>,
    recent_scores: VecDeque<u8>,
    avg_response_time_ms: f64,
}

/// Point-in-time view of the aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub total_checked: u64,
    pub live_count: u64,
    pub dead_count: u64,
    pub success_rate: f64,
    /// Validations per second since the aggregator started
    pub throughput: f64,
    pub avg_response_time_ms: f64,
    pub avg_health_score: f64,
    pub top_countries: Vec<(String, u64)>,
    pub anonymity: HashMap<Anonymity, u64>,
}

pub struct AnalyticsAggregator {
    counters: Mutex<Counters>,
    started: Instant,
}

impl AnalyticsAggregator {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started: Instant::now(),
        }
    }

    /// Fold one completed validation in
    pub fn record(&self, result: &ValidationResult) {
        let mut c = self.counters.lock();
        c.total_checked += 1;

        if !result.outcome.is_live() {
            c.dead_count += 1;
            return;
        }

        c.live_count += 1;

        if let Some(latency) = result.latency_ms {
            let n = c.live_count as f64;
            c.avg_response_time_ms = (c.avg_response_time_ms * (n - 1.0) + latency) / n;
        }

        let country = result
            .geo
            .as_ref()
            .and_then(|g| g.country_code.clone().or_else(|| g.country.clone()))
            .or_else(|| result.identity.as_ref().map(|i| i.country.clone()));
        if let Some(country) = country {
            *c.countries.entry(country).or_default() += 1;
        }

        let anonymity = result
            .geo
            .as_ref()
            .map(|g| g.anonymity)
            .unwrap_or_default();
        *c.anonymity.entry(anonymity).or_default() += 1;

        if c.recent_scores.len() == RECENT_SCORES_CAP {
            c.recent_scores.pop_front();
        }
        c.recent_scores.push_back(result.health_score);
    }

    pub fn snapshot(&self, top_n: usize) -> AnalyticsSnapshot {
        let c = self.counters.lock();
        let elapsed = self.started.elapsed().as_secs_f64();

        let mut top_countries: Vec<(String, u64)> =
            c.countries.iter().map(|(k, v)| (k.clone(), *v)).collect();
        top_countries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_countries.truncate(top_n);

        let avg_health_score = if c.recent_scores.is_empty() {
            0.0
        } else {
            c.recent_scores.iter().map(|&s| s as f64).sum::<f64>() / c.recent_scores.len() as f64
        };

        AnalyticsSnapshot {
            total_checked: c.total_checked,
            live_count: c.live_count,
            dead_count: c.dead_count,
            success_rate: if c.total_checked == 0 {
                0.0
            } else {
                c.live_count as f64 / c.total_checked as f64
            },
            throughput: if elapsed > 0.0 {
                c.total_checked as f64 / elapsed
            } else {
                0.0
            },
            avg_response_time_ms: c.avg_response_time_ms,
            avg_health_score,
            top_countries,
            anonymity: c.anonymity.clone(),
        }
    }
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::models::{GeoInfo, ProxyAddress, ValidationOutcome};

    fn live(latency: f64, score: u8, country: &str) -> ValidationResult {
        let mut result = ValidationResult::new(ProxyAddress::parse("10.0.0.1:80").unwrap());
        result.outcome = ValidationOutcome::Working;
        result.latency_ms = Some(latency);
        result.health_score = score;
        result.geo = Some(GeoInfo {
            country_code: Some(country.to_string()),
            anonymity: Anonymity::Elite,
            ..GeoInfo::default()
        });
        result
    }

    #[test]
    fn test_counts_and_rates() {
        let analytics = AnalyticsAggregator::new();
        analytics.record(&live(100.0, 80, "US"));
        analytics.record(&live(300.0, 60, "US"));
        analytics.record(&live(200.0, 70, "DE"));
        let mut failed = ValidationResult::new(ProxyAddress::parse("10.0.0.2:80").unwrap());
        failed.outcome = ValidationOutcome::Failed(FailureReason::PingFailed);
        failed.latency_ms = Some(5_000.0);
        analytics.record(&failed);

        let snap = analytics.snapshot(1);
        assert_eq!(snap.total_checked, 4);
        assert_eq!(snap.live_count, 3);
        assert_eq!(snap.dead_count, 1);
        assert_eq!(snap.success_rate, 0.75);
        // dead samples never move the latency mean
        assert!((snap.avg_response_time_ms - 200.0).abs() < 1e-9);
        assert!((snap.avg_health_score - 70.0).abs() < 1e-9);
        assert_eq!(snap.top_countries, vec![("US".to_string(), 2)]);
        assert_eq!(snap.anonymity.get(&Anonymity::Elite), Some(&3));
    }

    #[test]
    fn test_recent_scores_are_bounded() {
        let analytics = AnalyticsAggregator::new();
        for _ in 0..RECENT_SCORES_CAP {
            analytics.record(&live(100.0, 0, "US"));
        }
        for _ in 0..RECENT_SCORES_CAP {
            analytics.record(&live(100.0, 100, "US"));
        }
        assert_eq!(analytics.snapshot(5).avg_health_score, 100.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = AnalyticsAggregator::new().snapshot(5);
        assert_eq!(snap.total_checked, 0);
        assert_eq!(snap.success_rate, 0.0);
        assert!(snap.top_countries.is_empty());
    }
}
