//! Two-window memory leak heuristic.
//!
//! The average heap of the newest `recent_window` samples is compared with
//! the average of everything older. The relative growth between the two
//! windows is reported as `slope` and bucketed into a risk level. This is
//! deliberately cheap; it is not a regression over time.

use serde::{Deserialize, Serialize};

use vigil_core::MemoryUsage;
use vigil_core::config::MemorySettings;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One point in the memory history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub heap_used_mb: u64,
    pub heap_used_percent: u32,
    pub rss_mb: u64,
}

impl MemorySample {
    pub fn from_usage(usage: &MemoryUsage, timestamp: u64) -> Self {
        Self {
            timestamp,
            heap_used_mb: to_mb(usage.heap_used_bytes),
            heap_used_percent: usage.heap_used_percent().round() as u32,
            rss_mb: to_mb(usage.rss_bytes),
        }
    }
}

pub fn to_mb(bytes: u64) -> u64 {
    (bytes as f64 / BYTES_PER_MB).round() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    InsufficientData,
    Stable,
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTrend {
    pub trend: Trend,
    /// Relative growth between windows, rounded to two decimals.
    pub slope: f64,
    pub risk_level: RiskLevel,
}

impl MemoryTrend {
    pub fn insufficient() -> Self {
        Self {
            trend: Trend::InsufficientData,
            slope: 0.0,
            risk_level: RiskLevel::Low,
        }
    }

    /// Slope as a percentage, for human-facing messages.
    pub fn slope_percent(&self) -> f64 {
        (self.slope * 100.0).round()
    }
}

/// Slope cut-offs for [`analyze`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakThresholds {
    pub recent_window: usize,
    pub medium_slope: f64,
    pub high_slope: f64,
    pub decreasing_slope: f64,
}

impl From<&MemorySettings> for LeakThresholds {
    fn from(memory: &MemorySettings) -> Self {
        Self {
            recent_window: memory.leak_recent_window.max(1),
            medium_slope: memory.leak_medium_slope,
            high_slope: memory.leak_high_slope,
            decreasing_slope: memory.decreasing_slope,
        }
    }
}

impl Default for LeakThresholds {
    fn default() -> Self {
        Self::from(&MemorySettings::default())
    }
}

/// Classify a history given oldest first.
///
/// With no more samples than the recent window, the "old" window is just
/// the oldest sample.
pub fn analyze(samples: &[MemorySample], thresholds: &LeakThresholds) -> MemoryTrend {
    if samples.len() < 2 {
        return MemoryTrend::insufficient();
    }

    let window = thresholds.recent_window.max(1);
    let recent_start = samples.len().saturating_sub(window);
    let recent = &samples[recent_start..];
    let old = &samples[..recent_start.max(1)];

    let avg_recent = average_heap(recent);
    let avg_old = average_heap(old);
    let slope = if avg_old == 0.0 {
        0.0
    } else {
        (avg_recent - avg_old) / avg_old
    };

    let (trend, risk_level) = if slope > thresholds.high_slope {
        (Trend::Increasing, RiskLevel::High)
    } else if slope > thresholds.medium_slope {
        (Trend::Increasing, RiskLevel::Medium)
    } else if slope <= thresholds.decreasing_slope {
        (Trend::Decreasing, RiskLevel::Low)
    } else {
        (Trend::Stable, RiskLevel::Low)
    };

    MemoryTrend {
        trend,
        slope: (slope * 100.0).round() / 100.0,
        risk_level,
    }
}

fn average_heap(samples: &[MemorySample]) -> f64 {
    let total: u64 = samples.iter().map(|s| s.heap_used_mb).sum();
    total as f64 / samples.len() as f64
}
