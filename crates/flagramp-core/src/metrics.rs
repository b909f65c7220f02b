//! Point-in-time rollout metrics snapshots.
//!
//! A snapshot compares the canary (new path) against the baseline (legacy
//! path) at one instant. Snapshots are transient — the controller pulls one
//! per health-check tick and only history entries ever persist one.

use serde::{Deserialize, Serialize};

/// Detected legacy-vs-new output divergences, by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancyCounts {
    pub critical: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

/// Latency comparison between the two paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// P99 latency of the new path, milliseconds.
    pub canary_latency_p99_ms: f64,
    /// P99 latency of the legacy path, milliseconds.
    pub baseline_latency_p99_ms: f64,
    /// Canary degradation relative to baseline, percent.
    pub latency_degradation_percent: f64,
}

/// Error-rate comparison between the two paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StabilityMetrics {
    /// Error rate of the new path (0-100).
    pub canary_error_rate: f64,
    /// Error rate of the legacy path (0-100).
    pub baseline_error_rate: f64,
    /// Canary-minus-baseline delta, percentage points.
    pub error_rate_delta_percent: f64,
}

/// Request volume split across the two paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMetrics {
    pub total_requests: u64,
    pub canary_requests: u64,
    pub baseline_requests: u64,
}

/// One metrics snapshot as supplied by the external metrics backend.
///
/// `Default` is the all-zero snapshot a source returns when it has no data
/// yet for the current window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutMetrics {
    pub discrepancies: DiscrepancyCounts,
    pub performance: PerformanceMetrics,
    pub stability: StabilityMetrics,
    pub volume: VolumeMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_snapshot_by_default() {
        let m = RolloutMetrics::default();
        assert_eq!(m.discrepancies.critical, 0);
        assert_eq!(m.volume.total_requests, 0);
        assert_eq!(m.stability.error_rate_delta_percent, 0.0);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let m = RolloutMetrics {
            discrepancies: DiscrepancyCounts {
                critical: 1,
                high: 4,
                medium: 9,
                low: 20,
            },
            performance: PerformanceMetrics {
                canary_latency_p99_ms: 120.0,
                baseline_latency_p99_ms: 100.0,
                latency_degradation_percent: 20.0,
            },
            stability: StabilityMetrics {
                canary_error_rate: 1.5,
                baseline_error_rate: 1.0,
                error_rate_delta_percent: 0.5,
            },
            volume: VolumeMetrics {
                total_requests: 10_000,
                canary_requests: 500,
                baseline_requests: 9_500,
            },
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: RolloutMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
