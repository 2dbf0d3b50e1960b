use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::base::RegimeBase;
use super::classifier::classify;
use super::segments::average_confidence;
use super::thresholds::Thresholds;
use crate::config::CalibrationSettings;

/// Scores closer than this count as a tie.
const TIE_EPSILON: f64 = 1e-9;

/// Mapping from slider position to calibrated sensitivity, fixed per base.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub anchor_value: f64,
    pub anchor_normalized: f64,
    pub target_normalized: f64,
    pub best_slider: f64,
    pub best_score: f64,
    pub best_effective_sensitivity: f64,
    pub normalized_margin: f64,
    pub steps: usize,
}

impl Calibration {
    /// Identity calibration anchored at slider 5.
    pub fn neutral() -> Self {
        Self {
            anchor_value: 5.0,
            anchor_normalized: 0.5,
            target_normalized: 0.5,
            best_slider: 5.0,
            best_score: 0.0,
            best_effective_sensitivity: 10f64.powf(1.5),
            normalized_margin: normalized_margin(1000),
            steps: 0,
        }
    }

    /// Piecewise-linear remap sending `anchor_normalized` to
    /// `target_normalized` and fixing both ends of `[0, 1]`.
    pub fn remap(&self, normalized: f64) -> f64 {
        let u = normalized.clamp(0.0, 1.0);
        let anchor = self.anchor_normalized.clamp(0.0, 1.0);
        let target = self.target_normalized.clamp(0.0, 1.0);

        let c = if u <= anchor {
            if anchor <= 0.0 {
                target
            } else {
                u / anchor * target
            }
        } else if anchor >= 1.0 {
            target
        } else {
            target + (u - anchor) / (1.0 - anchor) * (1.0 - target)
        };
        c.clamp(0.0, 1.0)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::neutral()
    }
}

pub fn normalized_margin(steps: usize) -> f64 {
    (20.0 / steps.max(1) as f64).clamp(0.02, 0.25)
}

fn candidate(i: usize, steps: usize) -> f64 {
    i as f64 * 10.0 / (steps - 1) as f64
}

fn score_candidate(base: &RegimeBase, slider: f64) -> f64 {
    if base.model.is_none() {
        return 0.0;
    }
    let thresholds = Thresholds::derive(slider, &Calibration::neutral());
    let labels = classify(base, &thresholds);
    average_confidence(base, &labels).unwrap_or(0.0)
}

/// Search every candidate slider sequentially.
pub fn calibrate(base: &RegimeBase, settings: &CalibrationSettings) -> Calibration {
    let steps = settings.steps.max(2);
    if base.model.is_none() {
        return anchored(settings.anchor_value, steps);
    }
    let scores: Vec<(f64, f64)> = (0..steps)
        .map(|i| {
            let slider = candidate(i, steps);
            (slider, score_candidate(base, slider))
        })
        .collect();
    finish(scores, settings.anchor_value, steps)
}

/// Same search on the rayon pool. Scores are collected in candidate order
/// before the tie-break, so the result equals [`calibrate`].
pub fn calibrate_parallel(base: &RegimeBase, settings: &CalibrationSettings) -> Calibration {
    let steps = settings.steps.max(2);
    if base.model.is_none() {
        return anchored(settings.anchor_value, steps);
    }
    let scores: Vec<(f64, f64)> = (0..steps)
        .into_par_iter()
        .map(|i| {
            let slider = candidate(i, steps);
            (slider, score_candidate(base, slider))
        })
        .collect();
    finish(scores, settings.anchor_value, steps)
}

/// Highest score wins; near ties go to the slider closest to the anchor,
/// then to the lower slider.
fn select_best(scores: &[(f64, f64)], anchor: f64) -> (f64, f64) {
    let mut best = match scores.first() {
        Some(&first) => first,
        None => return (anchor, 0.0),
    };

    for &(slider, score) in &scores[1..] {
        if score > best.1 + TIE_EPSILON {
            best = (slider, score);
        } else if (score - best.1).abs() <= TIE_EPSILON {
            let distance = (slider - anchor).abs();
            let best_distance = (best.0 - anchor).abs();
            if distance + TIE_EPSILON < best_distance
                || ((distance - best_distance).abs() <= TIE_EPSILON && slider < best.0)
            {
                best = (slider, score);
            }
        }
    }
    best
}

/// Every candidate scores 0 without a model, so the anchor itself is the
/// answer whether or not it lies on the candidate grid.
fn anchored(anchor_value: f64, steps: usize) -> Calibration {
    let anchor_value = anchor_value.clamp(0.0, 10.0);
    finish(vec![(anchor_value, 0.0)], anchor_value, steps)
}

fn finish(scores: Vec<(f64, f64)>, anchor_value: f64, steps: usize) -> Calibration {
    let anchor_value = anchor_value.clamp(0.0, 10.0);
    let (best_slider, best_score) = select_best(&scores, anchor_value);
    let margin = normalized_margin(steps);
    let target_normalized = (best_slider / 10.0).clamp(margin, 1.0 - margin);

    debug!("Calibration scored {} candidates", scores.len());
    info!(
        "Calibrated: best slider {:.3} (score {:.4}), target {:.3}",
        best_slider, best_score, target_normalized
    );

    Calibration {
        anchor_value,
        anchor_normalized: anchor_value / 10.0,
        target_normalized,
        best_slider,
        best_score,
        best_effective_sensitivity: 10f64.powf(3.0 * best_slider / 10.0),
        normalized_margin: margin,
        steps,
    }
}
