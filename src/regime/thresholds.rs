use serde::{Deserialize, Serialize};

use super::calibration::Calibration;

/// Decades spanned by the effective sensitivity (`1..=1000`).
const SENSITIVITY_DECADES: f64 = 3.0;
/// Steepness of the logistic progress curve.
const PROGRESS_STEEPNESS: f64 = 7.2;
/// Flat cutoffs sit at this fraction of the matching trend cutoff.
const FLAT_FRACTION: f64 = 0.6;

/// Every knob the classifier reads for one slider position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub slider: f64,
    pub normalized: f64,
    pub calibrated: f64,
    pub effective_sensitivity: f64,
    /// Logistic progress in `[0, 1]`; 0 is least sensitive
    pub progress: f64,
    pub adx_trend: f64,
    pub adx_flat: f64,
    pub bollinger_trend: f64,
    pub bollinger_flat: f64,
    pub atr_trend: f64,
    pub atr_flat: f64,
    pub smoothing_window: usize,
    pub min_segment_length: usize,
    pub target_trend_coverage: f64,
    pub promotion_floor: f64,
}

impl Thresholds {
    /// Map a 0-10 slider onto classifier thresholds.
    ///
    /// Non-finite sliders are treated as the calibration anchor.
    pub fn derive(slider: f64, calibration: &Calibration) -> Self {
        let slider = if slider.is_finite() {
            slider.clamp(0.0, 10.0)
        } else {
            calibration.anchor_value
        };
        let normalized = slider / 10.0;
        let calibrated = calibration.remap(normalized);
        let effective_sensitivity = 10f64.powf(SENSITIVITY_DECADES * calibrated);
        let progress = progress(effective_sensitivity);

        let adx_trend = lerp(40.0, 16.0, progress);
        let bollinger_trend = lerp(0.10, 0.04, progress);
        let atr_trend = lerp(0.030, 0.010, progress);

        Self {
            slider,
            normalized,
            calibrated,
            effective_sensitivity,
            progress,
            adx_trend,
            adx_flat: adx_trend * FLAT_FRACTION,
            bollinger_trend,
            bollinger_flat: bollinger_trend * FLAT_FRACTION,
            atr_trend,
            atr_flat: atr_trend * FLAT_FRACTION,
            smoothing_window: lerp(7.0, 3.0, progress).round() as usize,
            min_segment_length: lerp(6.0, 3.0, progress).round() as usize,
            target_trend_coverage: lerp(0.38, 0.86, progress),
            promotion_floor: lerp(0.68, 0.40, progress),
        }
    }
}

/// Logistic progress of an effective sensitivity, rescaled so that
/// sensitivity 1 maps to 0 and 1000 maps to 1.
pub fn progress(effective_sensitivity: f64) -> f64 {
    let x = effective_sensitivity.max(1.0).log10() / SENSITIVITY_DECADES;
    let half = PROGRESS_STEEPNESS / 2.0;
    let lo = sigmoid(-half);
    let hi = sigmoid(half);
    ((sigmoid(PROGRESS_STEEPNESS * (x - 0.5)) - lo) / (hi - lo)).clamp(0.0, 1.0)
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}
