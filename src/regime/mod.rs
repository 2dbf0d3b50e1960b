pub mod base;
pub mod calibration;
pub mod classifier;
pub mod context;
pub mod segments;
pub mod thresholds;

pub use base::RegimeBase;
pub use calibration::{calibrate, calibrate_parallel, Calibration};
pub use classifier::classify;
pub use context::{BaseEvent, BaseUpdate, RegimeContext};
pub use segments::{aggregate, average_confidence, LabelStats, RegimeSummary};
pub use thresholds::Thresholds;

use serde::{Deserialize, Serialize};

use crate::types::{DayLabel, Segment};

/// Result of one slider pass, ready for the chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeOverlay {
    pub segments: Vec<Segment>,
    pub summary: Option<RegimeSummary>,
    pub collapsed: bool,
}

impl RegimeOverlay {
    pub fn empty() -> Self {
        Self {
            segments: Vec::new(),
            summary: None,
            collapsed: false,
        }
    }

    pub fn with_collapsed(mut self, collapsed: bool) -> Self {
        self.collapsed = collapsed;
        self
    }

    /// Segments to paint; nothing while the overlay is collapsed.
    pub fn shading(&self) -> &[Segment] {
        if self.collapsed {
            &[]
        } else {
            &self.segments
        }
    }

    pub fn snapshot(&self) -> Option<RegimeSnapshot> {
        self.summary.as_ref().map(RegimeSnapshot::from_summary)
    }
}

/// Compact view used when comparing strategies side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub latest_label: Option<DayLabel>,
    pub latest_return_pct: Option<f64>,
    pub average_confidence: Option<f64>,
}

impl RegimeSnapshot {
    pub fn from_summary(summary: &RegimeSummary) -> Self {
        Self {
            latest_label: summary.latest_label,
            latest_return_pct: summary.latest_segment_return_pct,
            average_confidence: summary.average_confidence,
        }
    }
}

/// Thresholds, labels and aggregation for one slider position.
pub fn run_pass(base: &RegimeBase, slider: f64) -> RegimeOverlay {
    let thresholds = Thresholds::derive(slider, &base.calibration);
    let labels = classify(base, &thresholds);
    let (segments, summary) = aggregate(base, &labels, &thresholds);
    RegimeOverlay {
        segments,
        summary: Some(summary),
        collapsed: false,
    }
}

/// One point of the sensitivity curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub slider: f64,
    pub trend_coverage_pct: f64,
    pub target_trend_coverage_pct: f64,
    pub segments: usize,
    pub average_confidence: Option<f64>,
}

/// Classify at every integer slider position from 0 to 10.
pub fn sweep(base: &RegimeBase) -> Vec<SweepPoint> {
    (0..=10)
        .map(|step| {
            let slider = step as f64;
            let thresholds = Thresholds::derive(slider, &base.calibration);
            let labels = classify(base, &thresholds);
            let (segments, summary) = aggregate(base, &labels, &thresholds);
            SweepPoint {
                slider,
                trend_coverage_pct: summary.trend_coverage_pct,
                target_trend_coverage_pct: summary.target_trend_coverage_pct,
                segments: segments.len(),
                average_confidence: summary.average_confidence,
            }
        })
        .collect()
}
