//! Trend statistics over a windowed f64 series via simple linear
//! regression, shared by `get_speed_trend` and `get_temp_trend`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendStats {
    pub count: usize,
    pub latest: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub slope: f64,
    pub trend: TrendDirection,
}

/// Slope below this magnitude (units per sample) reads as `Stable` rather
/// than noise being reported as a trend.
const STABLE_SLOPE_EPSILON: f64 = 0.05;

pub fn compute_trend(window: &[f64]) -> TrendStats {
    if window.is_empty() {
        return TrendStats {
            count: 0,
            latest: 0.0,
            avg: 0.0,
            min: 0.0,
            max: 0.0,
            std_dev: 0.0,
            slope: 0.0,
            trend: TrendDirection::Unknown,
        };
    }

    let n = window.len();
    let avg = window.iter().sum::<f64>() / n as f64;
    let min = window.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = window.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let variance = window.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();

    if n < 2 {
        return TrendStats {
            count: n,
            latest: window[n - 1],
            avg,
            min,
            max,
            std_dev,
            slope: 0.0,
            trend: TrendDirection::Unknown,
        };
    }

    // Ordinary least squares slope over x = 0..n-1.
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let x_mean = xs.iter().sum::<f64>() / n as f64;
    let numerator: f64 = xs.iter().zip(window).map(|(x, y)| (x - x_mean) * (y - avg)).sum();
    let denominator: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    let slope = if denominator.abs() < f64::EPSILON { 0.0 } else { numerator / denominator };

    let trend = if slope.abs() < STABLE_SLOPE_EPSILON {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Rising
    } else {
        TrendDirection::Falling
    };

    TrendStats { count: n, latest: window[n - 1], avg, min, max, std_dev, slope, trend }
}
