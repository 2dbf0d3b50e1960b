use serde::{Deserialize, Serialize};

use super::base::RegimeBase;
use super::thresholds::Thresholds;
use crate::ml::hmm::HmmDiagnostics;
use crate::types::{BarIndex, DataSource, DayLabel, Segment};

/// Per-label statistics for the diagnostics panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    pub label: DayLabel,
    pub days: usize,
    pub segments: usize,
    pub coverage_pct: f64,
    /// Compounded price return over the label's days
    pub price_return_pct: f64,
    /// Compounded strategy return, or the price return without a strategy series
    pub strategy_return_pct: f64,
}

/// Everything shown next to the chart for one slider pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSummary {
    pub days: usize,
    pub segments: usize,
    pub labels: Vec<LabelStats>,
    pub trend_coverage_pct: f64,
    pub target_trend_coverage_pct: f64,
    pub average_confidence: Option<f64>,
    pub latest_label: Option<DayLabel>,
    /// Compounded strategy return over the latest segment
    pub latest_segment_return_pct: Option<f64>,
    pub slider: f64,
    pub effective_sensitivity: f64,
    pub source: Option<DataSource>,
    pub hmm: Option<HmmDiagnostics>,
}

impl RegimeSummary {
    pub fn stats(&self, label: DayLabel) -> Option<&LabelStats> {
        self.labels.iter().find(|s| s.label == label)
    }
}

/// Maximal runs of identical labels, `end` inclusive.
pub fn build_segments(base: &RegimeBase, labels: &[DayLabel]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut start = 0;

    for t in 1..=labels.len() {
        if t == labels.len() || labels[t] != labels[start] {
            let (Some(start_date), Some(end_date)) =
                (base.series.date(BarIndex(start)), base.series.date(BarIndex(t - 1)))
            else {
                break;
            };
            segments.push(Segment {
                label: labels[start],
                start: BarIndex(start),
                end: BarIndex(t - 1),
                start_date,
                end_date,
            });
            start = t;
        }
    }
    segments
}

/// Mean over days with a posterior of the largest posterior among the
/// states consistent with that day's label. `None` without a model.
pub fn average_confidence(base: &RegimeBase, labels: &[DayLabel]) -> Option<f64> {
    let model = base.model.as_ref()?;
    let mut total = 0.0;
    let mut count = 0usize;

    for (t, &label) in labels.iter().enumerate() {
        let Some(row) = base.observations.row_of(BarIndex(t)) else {
            continue;
        };
        if let Some(confidence) = model.confidence(row, label) {
            total += confidence;
            count += 1;
        }
    }

    (count > 0).then(|| total / count as f64)
}

fn compounded_pct(log_returns: impl Iterator<Item = f64>) -> f64 {
    log_returns.filter(|r| r.is_finite()).sum::<f64>().exp_m1() * 100.0
}

fn strategy_return(base: &RegimeBase, t: usize) -> Option<f64> {
    match &base.series.strategy_log_returns {
        Some(series) => series.get(t).copied().flatten(),
        None => base.features[t].log_return,
    }
}

/// Segments and summary for one labelled pass.
pub fn aggregate(base: &RegimeBase, labels: &[DayLabel], thresholds: &Thresholds) -> (Vec<Segment>, RegimeSummary) {
    let segments = build_segments(base, labels);
    let n = labels.len();

    let stats: Vec<LabelStats> = DayLabel::ALL
        .into_iter()
        .map(|label| {
            let days: Vec<usize> = (0..n).filter(|&t| labels[t] == label).collect();
            LabelStats {
                label,
                days: days.len(),
                segments: segments.iter().filter(|s| s.label == label).count(),
                coverage_pct: percentage(days.len(), n),
                price_return_pct: compounded_pct(days.iter().filter_map(|&t| base.features[t].log_return)),
                strategy_return_pct: compounded_pct(days.iter().filter_map(|&t| strategy_return(base, t))),
            }
        })
        .collect();

    let trend_days: usize = stats.iter().filter(|s| s.label.is_trend()).map(|s| s.days).sum();
    let latest = segments.last();

    let summary = RegimeSummary {
        days: n,
        segments: segments.len(),
        labels: stats,
        trend_coverage_pct: percentage(trend_days, n),
        target_trend_coverage_pct: thresholds.target_trend_coverage * 100.0,
        average_confidence: average_confidence(base, labels),
        latest_label: latest.map(|s| s.label),
        latest_segment_return_pct: latest
            .map(|s| compounded_pct((s.start.get()..=s.end.get()).filter_map(|t| strategy_return(base, t)))),
        slider: thresholds.slider,
        effective_sensitivity: thresholds.effective_sensitivity,
        source: base.series.source,
        hmm: base.model.as_ref().map(|m| m.diagnostics.clone()),
    };

    (segments, summary)
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
