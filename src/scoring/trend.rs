//! Quality trend and stability analysis over a proxy's check history

use serde::{Deserialize, Serialize};

use crate::models::CheckHistory;

/// Direction a proxy's quality has been moving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Stable,
    Improving,
    Degrading,
    Fluctuating,
}

impl TrendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLabel::Stable => "stable",
            TrendLabel::Improving => "improving",
            TrendLabel::Degrading => "degrading",
            TrendLabel::Fluctuating => "fluctuating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityTrend {
    pub reliability_score: f64,
    pub label: TrendLabel,
}

/// One `(healthScore, latencyMs)` observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSample {
    pub health_score: f64,
    pub latency_ms: f64,
}

/// One `(success, latencyMs)` observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilitySample {
    pub success: bool,
    pub latency_ms: f64,
}

fn mean_delta(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.len() < 2 {
        return 0.0;
    }
    let sum: f64 = values.windows(2).map(|w| w[1] - w[0]).sum();
    sum / (values.len() - 1) as f64
}

/// Classify the direction of a series of observations (oldest first).
pub fn trend(samples: &[TrendSample]) -> QualityTrend {
    if samples.len() < 2 {
        return QualityTrend {
            reliability_score: 0.0,
            label: TrendLabel::Stable,
        };
    }

    let score_delta = mean_delta(samples.iter().map(|s| s.health_score));
    let time_delta = mean_delta(samples.iter().map(|s| s.latency_ms));

    let label = if score_delta.abs() < 5.0 && time_delta.abs() < 50.0 {
        TrendLabel::Stable
    } else if score_delta > 0.0 && time_delta < 0.0 {
        TrendLabel::Improving
    } else if score_delta < 0.0 && time_delta > 0.0 {
        TrendLabel::Degrading
    } else {
        TrendLabel::Fluctuating
    };

    let reliability =
        (1.0 - score_delta.abs() / 100.0) * 50.0 + (1.0 - time_delta.abs() / 1000.0) * 50.0;

    QualityTrend {
        reliability_score: reliability.clamp(0.0, 100.0),
        label,
    }
}

/// Trend over the checks that measured a latency
pub fn trend_from_history(history: &CheckHistory) -> QualityTrend {
    let samples: Vec<TrendSample> = history
        .iter()
        .filter_map(|check| {
            check.latency_ms.map(|latency_ms| TrendSample {
                health_score: check.health_score as f64,
                latency_ms,
            })
        })
        .collect();
    trend(&samples)
}

/// Stability from success ratio, latency variance and mean latency
pub fn stability(samples: &[StabilitySample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let total = samples.len() as f64;
    let successes = samples.iter().filter(|s| s.success).count() as f64;
    let mean = samples.iter().map(|s| s.latency_ms).sum::<f64>() / total;
    let variance = samples
        .iter()
        .map(|s| (s.latency_ms - mean).powi(2))
        .sum::<f64>()
        / total;

    let value = successes / total * 50.0
        + (1.0 - (variance / 1e6).min(1.0)) * 30.0
        + (1.0 - (mean / 2000.0).min(1.0)) * 20.0;

    value.clamp(0.0, 100.0)
}

pub fn stability_from_history(history: &CheckHistory) -> f64 {
    let samples: Vec<StabilitySample> = history
        .iter()
        .map(|check| StabilitySample {
            success: check.status.is_live(),
            latency_ms: check.latency_ms.unwrap_or(0.0),
        })
        .collect();
    stability(&samples)
}
