//! Composite 0-100 health score for a checked proxy

use crate::models::Anonymity;

const RELIABILITY_BASELINE: i64 = 15;
const HOSTING_PENALTY: i64 = 15;

fn latency_points(latency_ms: f64) -> i64 {
    if latency_ms <= 50.0 {
        50
    } else if latency_ms <= 100.0 {
        40
    } else if latency_ms <= 300.0 {
        30
    } else if latency_ms <= 500.0 {
        20
    } else if latency_ms <= 1000.0 {
        10
    } else {
        let steps = ((latency_ms - 1000.0) / 500.0).floor();
        (10.0 - steps).max(0.0) as i64
    }
}

fn speed_points(speed_mbps: f64) -> i64 {
    if speed_mbps >= 10.0 {
        30
    } else if speed_mbps >= 5.0 {
        25
    } else if speed_mbps >= 1.0 {
        15
    } else if speed_mbps >= 0.5 {
        10
    } else {
        5
    }
}

fn anonymity_points(anonymity: Anonymity) -> i64 {
    match anonymity {
        Anonymity::Elite => 25,
        Anonymity::Anonymous => 20,
        Anonymity::Transparent => 10,
        Anonymity::Unknown => 15,
    }
}

/// Score a proxy from its measured latency and throughput plus geolocation signals.
///
/// Non-finite or negative inputs are treated as the worst case for that component.
pub fn score(
    latency_ms: f64,
    speed_mbps: f64,
    anonymity: Anonymity,
    is_hosting: bool,
    error_count: u32,
) -> u8 {
    let latency_ms = if latency_ms.is_finite() && latency_ms >= 0.0 {
        latency_ms
    } else {
        f64::MAX
    };
    let speed_mbps = if speed_mbps.is_finite() && speed_mbps >= 0.0 {
        speed_mbps
    } else {
        0.0
    };

    let mut total = latency_points(latency_ms)
        + speed_points(speed_mbps)
        + anonymity_points(anonymity)
        + RELIABILITY_BASELINE;

    if latency_ms < 1000.0 && speed_mbps > 1.0 {
        total += 10;
    }
    if is_hosting {
        total -= HOSTING_PENALTY;
    }
    total -= (error_count as i64 * 5).min(20);

    total.clamp(0, 100) as u8
}
