//! Per-day regime labels for one slider pass.
//!
//! The pass is seed -> fill -> smooth -> promote -> enforce minimum segment
//! length -> promote whole runs. It reads the base and the thresholds only.

use tracing::trace;

use super::base::RegimeBase;
use super::thresholds::{sigmoid, Thresholds};
use crate::ml::features::FeatureRow;
use crate::types::{BarIndex, DayLabel, Direction, Volatility};

const WEIGHT_ADX: f64 = 0.30;
const WEIGHT_BOLLINGER: f64 = 0.25;
const WEIGHT_ATR: f64 = 0.20;
const WEIGHT_EFFICIENCY: f64 = 0.15;
const WEIGHT_HMM: f64 = 0.10;
const EFFICIENCY_PIVOT: f64 = 0.5;
/// Score given to an unavailable promotion component.
const NEUTRAL_SCORE: f64 = 0.5;

/// Label every bar of the base.
pub fn classify(base: &RegimeBase, thresholds: &Thresholds) -> Vec<DayLabel> {
    let n = base.len();
    if n == 0 {
        return Vec::new();
    }

    let seeds: Vec<Option<DayLabel>> = (0..n).map(|t| seed_label(base, thresholds, t)).collect();
    let filled = fill(&seeds);
    let mut labels = smooth(&filled, thresholds.smoothing_window);

    let scores: Vec<f64> = (0..n).map(|t| promotion_score(base, thresholds, t)).collect();

    let promoted = promote_days(&mut labels, base, &scores, thresholds);
    enforce_min_segment(&mut labels, thresholds.min_segment_length);
    let promoted_runs = promote_runs(&mut labels, base, &scores, thresholds);

    trace!(
        "Slider {:.2}: promoted {} days and {} runs",
        thresholds.slider,
        promoted,
        promoted_runs
    );
    labels
}

/// Volatility forced by at least two of ADX, Bollinger width and ATR ratio.
pub fn volatility_vote(features: &FeatureRow, thresholds: &Thresholds) -> Option<Volatility> {
    let indicators = [
        (features.adx, thresholds.adx_trend, thresholds.adx_flat),
        (features.bollinger_width, thresholds.bollinger_trend, thresholds.bollinger_flat),
        (features.atr_ratio, thresholds.atr_trend, thresholds.atr_flat),
    ];

    let mut high = 0;
    let mut low = 0;
    for (value, trend, flat) in indicators {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            if v >= trend {
                high += 1;
            }
            if v <= flat {
                low += 1;
            }
        }
    }

    if high >= 2 {
        Some(Volatility::High)
    } else if low >= 2 {
        Some(Volatility::Low)
    } else {
        None
    }
}

fn seed_label(base: &RegimeBase, thresholds: &Thresholds, t: usize) -> Option<DayLabel> {
    let features = &base.features[t];
    let vote = volatility_vote(features, thresholds);
    let day_direction = features.log_return.and_then(Direction::from_sign);

    let model_label = base
        .model
        .as_ref()
        .zip(base.observation_row(BarIndex(t)))
        .and_then(|(model, row)| model.label_for_row(row));

    let (direction, volatility) = match model_label {
        Some(label) => (
            day_direction.or(Some(label.direction())),
            vote.or(Some(label.volatility())),
        ),
        None => {
            let direction = day_direction.or_else(|| base.median_return.and_then(Direction::from_sign));
            let volatility = vote.or_else(|| {
                let ratio = features.atr_ratio?;
                let median = base.median_atr_ratio?;
                Some(if ratio > median { Volatility::High } else { Volatility::Low })
            });
            (direction, volatility)
        }
    };

    match (volatility?, direction) {
        (Volatility::Low, _) => Some(DayLabel::RangeBound),
        (Volatility::High, Some(direction)) => Some(DayLabel::trend(direction)),
        (Volatility::High, None) => None,
    }
}

/// Forward fill, then backward fill. Nothing resolved means all range-bound.
pub fn fill(seeds: &[Option<DayLabel>]) -> Vec<DayLabel> {
    let mut out: Vec<Option<DayLabel>> = Vec::with_capacity(seeds.len());
    let mut last = None;
    for seed in seeds {
        if seed.is_some() {
            last = *seed;
        }
        out.push(last);
    }

    let first = out.iter().flatten().next().copied().unwrap_or(DayLabel::RangeBound);
    out.into_iter().map(|l| l.unwrap_or(first)).collect()
}

/// Centered majority vote over the unsmoothed labels. A tie for the
/// maximum keeps the current label.
pub fn smooth(labels: &[DayLabel], window: usize) -> Vec<DayLabel> {
    let n = labels.len();
    let half = window / 2;
    if half == 0 {
        return labels.to_vec();
    }

    (0..n)
        .map(|t| {
            let lo = t.saturating_sub(half);
            let hi = (t + half).min(n - 1);
            let mut counts = [0usize; 3];
            for label in &labels[lo..=hi] {
                counts[label.index()] += 1;
            }

            let current = labels[t];
            let max = counts.iter().copied().max().unwrap_or(0);
            if counts[current.index()] == max {
                current
            } else {
                DayLabel::ALL
                    .into_iter()
                    .find(|l| counts[l.index()] == max)
                    .unwrap_or(current)
            }
        })
        .collect()
}

/// Promotion score of a range-bound day in `[0, 1]`.
pub fn promotion_score(base: &RegimeBase, thresholds: &Thresholds, t: usize) -> f64 {
    let features = &base.features[t];
    let efficiency = base.momentum[t].map(|m| m.efficiency);

    let hmm = base
        .model
        .as_ref()
        .zip(base.observation_row(BarIndex(t)))
        .and_then(|(model, row)| model.high_vol_mass(row))
        .unwrap_or(NEUTRAL_SCORE);

    WEIGHT_ADX * squash(features.adx, thresholds.adx_flat)
        + WEIGHT_BOLLINGER * squash(features.bollinger_width, thresholds.bollinger_flat)
        + WEIGHT_ATR * squash(features.atr_ratio, thresholds.atr_flat)
        + WEIGHT_EFFICIENCY * squash(efficiency, EFFICIENCY_PIVOT)
        + WEIGHT_HMM * hmm
}

fn squash(value: Option<f64>, pivot: f64) -> f64 {
    match value.filter(|v| v.is_finite()) {
        Some(v) if pivot > 0.0 => sigmoid(3.0 * (v - pivot) / pivot),
        _ => NEUTRAL_SCORE,
    }
}

fn trend_count(labels: &[DayLabel]) -> usize {
    labels.iter().filter(|l| l.is_trend()).count()
}

fn coverage_met(trend: usize, n: usize, target: f64) -> bool {
    trend as f64 / n as f64 >= target
}

/// Promote the best-scoring range-bound days with a momentum direction
/// until the coverage target is met or scores fall below the floor.
fn promote_days(labels: &mut [DayLabel], base: &RegimeBase, scores: &[f64], thresholds: &Thresholds) -> usize {
    let n = labels.len();
    let mut trend = trend_count(labels);
    if n == 0 || coverage_met(trend, n, thresholds.target_trend_coverage) {
        return 0;
    }

    let mut candidates: Vec<(usize, f64, Direction)> = (0..n)
        .filter(|&t| labels[t] == DayLabel::RangeBound)
        .filter_map(|t| {
            let direction = base.momentum[t].and_then(|m| Direction::from_sign(m.net))?;
            Some((t, scores[t], direction))
        })
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut promoted = 0;
    for (t, score, direction) in candidates {
        if coverage_met(trend, n, thresholds.target_trend_coverage) || score < thresholds.promotion_floor {
            break;
        }
        labels[t] = DayLabel::trend(direction);
        trend += 1;
        promoted += 1;
    }
    promoted
}

/// Maximal runs of identical labels as `(start, end_exclusive, label)`.
pub fn runs(labels: &[DayLabel]) -> Vec<(usize, usize, DayLabel)> {
    let mut out = Vec::new();
    let mut start = 0;
    for t in 1..=labels.len() {
        if t == labels.len() || labels[t] != labels[start] {
            if t > start {
                out.push((start, t, labels[start]));
            }
            start = t;
        }
    }
    out
}

/// Merge runs shorter than `min_len` into their successor (the last run
/// merges into its predecessor) until none remain or one run is left.
pub fn enforce_min_segment(labels: &mut [DayLabel], min_len: usize) {
    loop {
        let current = runs(labels);
        if current.len() <= 1 {
            return;
        }
        let Some(i) = current.iter().position(|(s, e, _)| e - s < min_len) else {
            return;
        };

        let (start, end, _) = current[i];
        let replacement = if i + 1 < current.len() {
            current[i + 1].2
        } else {
            current[i - 1].2
        };
        labels[start..end].fill(replacement);
    }
}

/// Second promotion pass over whole range-bound runs, so every run keeps
/// its post-enforcement length.
fn promote_runs(labels: &mut [DayLabel], base: &RegimeBase, scores: &[f64], thresholds: &Thresholds) -> usize {
    let n = labels.len();
    let mut trend = trend_count(labels);
    if n == 0 || coverage_met(trend, n, thresholds.target_trend_coverage) {
        return 0;
    }

    let mut candidates: Vec<(usize, usize, f64, Direction)> = runs(labels)
        .into_iter()
        .filter(|(_, _, label)| *label == DayLabel::RangeBound)
        .filter_map(|(start, end, _)| {
            let eligible: Vec<usize> = (start..end).filter(|&t| base.momentum[t].is_some()).collect();
            if eligible.is_empty() {
                return None;
            }
            let net: f64 = eligible.iter().filter_map(|&t| base.momentum[t]).map(|m| m.net).sum();
            let direction = Direction::from_sign(net)?;
            let mean = eligible.iter().map(|&t| scores[t]).sum::<f64>() / eligible.len() as f64;
            Some((start, end, mean, direction))
        })
        .collect();
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));

    let mut promoted = 0;
    for (start, end, mean, direction) in candidates {
        if coverage_met(trend, n, thresholds.target_trend_coverage) || mean < thresholds.promotion_floor {
            break;
        }
        labels[start..end].fill(DayLabel::trend(direction));
        trend += end - start;
        promoted += 1;
    }
    promoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regime::calibration::Calibration;

    use DayLabel::{BearHighVol as Bear, BullHighVol as Bull, RangeBound as Range};

    fn thresholds(slider: f64) -> Thresholds {
        Thresholds::derive(slider, &Calibration::neutral())
    }

    #[test]
    fn test_vote_needs_two_indicators() {
        let th = thresholds(5.0);
        let high = FeatureRow {
            adx: Some(th.adx_trend + 1.0),
            bollinger_width: Some(th.bollinger_trend),
            atr_ratio: Some(0.0),
            ..Default::default()
        };
        assert_eq!(volatility_vote(&high, &th), Some(Volatility::High));

        let low = FeatureRow {
            adx: Some(th.adx_trend + 1.0),
            bollinger_width: Some(th.bollinger_flat),
            atr_ratio: Some(th.atr_flat * 0.5),
            ..Default::default()
        };
        assert_eq!(volatility_vote(&low, &th), Some(Volatility::Low));

        let one = FeatureRow {
            adx: Some(th.adx_trend + 1.0),
            ..Default::default()
        };
        assert_eq!(volatility_vote(&one, &th), None);
    }

    #[test]
    fn test_fill_forward_then_backward() {
        let seeds = [None, None, Some(Bull), None, Some(Bear), None];
        assert_eq!(fill(&seeds), vec![Bull, Bull, Bull, Bull, Bear, Bear]);
        assert_eq!(fill(&[None, None]), vec![Range, Range]);
    }

    #[test]
    fn test_smooth_majority_and_ties() {
        let labels = [Bull, Range, Bull, Bull, Bear, Range, Bear];
        let smoothed = smooth(&labels, 3);
        assert_eq!(smoothed, vec![Bull, Bull, Bull, Bull, Bear, Bear, Bear]);

        // Window of two at the end: one Bull, one Bear keeps the current label.
        assert_eq!(smooth(&[Bull, Bear], 3), vec![Bull, Bear]);
        assert_eq!(smooth(&labels, 1), labels.to_vec());
    }

    #[test]
    fn test_runs() {
        let labels = [Bull, Bull, Range, Bear, Bear, Bear];
        assert_eq!(runs(&labels), vec![(0, 2, Bull), (2, 3, Range), (3, 6, Bear)]);
        assert!(runs(&[]).is_empty());
    }

    #[test]
    fn test_enforce_merges_into_successor() {
        let mut labels = vec![Bull, Bull, Bull, Range, Bear, Bear, Bear];
        enforce_min_segment(&mut labels, 3);
        assert_eq!(labels, vec![Bull, Bull, Bull, Bear, Bear, Bear, Bear]);
    }

    #[test]
    fn test_enforce_last_run_merges_backward() {
        let mut labels = vec![Range, Range, Range, Range, Bull];
        enforce_min_segment(&mut labels, 3);
        assert_eq!(labels, vec![Range; 5]);
    }

    #[test]
    fn test_enforce_invariant_holds() {
        let pattern = [Bull, Range, Range, Bear, Bull, Bull, Range, Bear, Bear, Range, Bull, Range];
        let mut labels: Vec<DayLabel> = pattern.iter().cycle().take(60).copied().collect();
        enforce_min_segment(&mut labels, 4);
        let r = runs(&labels);
        assert!(r.len() == 1 || r.iter().all(|(s, e, _)| e - s >= 4));
    }

    #[test]
    fn test_squash_neutral_when_missing() {
        assert_eq!(squash(None, 10.0), 0.5);
        assert_eq!(squash(Some(f64::NAN), 10.0), 0.5);
        assert!((squash(Some(10.0), 10.0) - 0.5).abs() < 1e-12);
        assert!(squash(Some(20.0), 10.0) > 0.9);
    }
}
