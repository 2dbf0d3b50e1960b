use tracing::{debug, info};

use super::calibration::{calibrate, calibrate_parallel, Calibration};
use crate::config::{CalibrationSettings, RegimeSettings};
use crate::error::{RegimeError, RegimeResult};
use crate::indicators::median;
use crate::ml::features::{extract_features, trailing_momentum, FeatureRow, Momentum, ObservationSet};
use crate::ml::hmm::{train_regime_model, HmmModel};
use crate::types::{BarIndex, PriceSeries, SeriesInput};

/// Everything derived once per price series. Slider passes only read it.
#[derive(Debug, Clone)]
pub struct RegimeBase {
    pub series: PriceSeries,
    pub features: Vec<FeatureRow>,
    pub momentum: Vec<Option<Momentum>>,
    pub observations: ObservationSet,
    pub model: Option<HmmModel>,
    /// Why no model was trained, when there is none
    pub training_error: Option<RegimeError>,
    pub calibration: Calibration,
    pub median_return: Option<f64>,
    pub median_atr_ratio: Option<f64>,
}

impl RegimeBase {
    /// Ingest a raw series and build a calibrated base.
    pub fn from_input(input: &SeriesInput, settings: &RegimeSettings) -> RegimeResult<Self> {
        let (series, report) = input.ingest()?;
        info!(
            "Ingested {} bars from {} ({} incomplete, strategy series: {})",
            report.bars,
            report.source.map(|s| s.as_str()).unwrap_or("none"),
            report.bars_missing_fields,
            report.strategy_series
        );
        Ok(Self::build(series, settings))
    }

    /// Extract features, train the HMM and calibrate the slider.
    pub fn build(series: PriceSeries, settings: &RegimeSettings) -> Self {
        let mut base = Self::uncalibrated(series, settings);
        base.calibration = run_calibration(&base, &settings.calibration);
        base
    }

    /// Copy of this base calibrated again under new calibration settings.
    /// Features and model are kept.
    pub fn recalibrated(&self, settings: &CalibrationSettings) -> Self {
        let mut base = self.clone();
        base.calibration = run_calibration(self, settings);
        base
    }

    /// Same as [`RegimeBase::build`] but with the neutral calibration.
    pub fn uncalibrated(series: PriceSeries, settings: &RegimeSettings) -> Self {
        for diagnostic in series.missing_fields().iter().take(8) {
            debug!("{}", diagnostic);
        }

        let features = extract_features(&series, &settings.features);
        let momentum = trailing_momentum(&features, settings.features.momentum_window);
        let observations = ObservationSet::normalize(&features);

        let (model, training_error) = match train_regime_model(&observations, &settings.hmm) {
            Ok(model) => (Some(model), None),
            Err(e) => {
                info!("No HMM for this series, using heuristic labels: {}", e);
                (None, Some(e))
            }
        };

        let median_return = median(features.iter().filter_map(|f| f.log_return));
        let median_atr_ratio = median(features.iter().filter_map(|f| f.atr_ratio));

        Self {
            series,
            features,
            momentum,
            observations,
            model,
            training_error,
            calibration: Calibration::neutral(),
            median_return,
            median_atr_ratio,
        }
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Observation row of a bar, if the bar entered HMM training.
    pub fn observation_row(&self, bar: BarIndex) -> Option<usize> {
        self.model.as_ref()?;
        self.observations.row_of(bar)
    }

    /// Copy of this base with a different strategy series. Features, model
    /// and calibration are kept.
    pub fn with_strategy_returns(&self, strategy_log_returns: Option<Vec<Option<f64>>>) -> Self {
        let mut base = self.clone();
        base.series.strategy_log_returns = strategy_log_returns;
        base
    }
}

fn run_calibration(base: &RegimeBase, settings: &CalibrationSettings) -> Calibration {
    if settings.parallel {
        calibrate_parallel(base, settings)
    } else {
        calibrate(base, settings)
    }
}
