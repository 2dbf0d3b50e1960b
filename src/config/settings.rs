use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{RegimeError, RegimeResult};

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RegimeSettings {
    pub features: FeatureSettings,
    pub hmm: HmmSettings,
    pub calibration: CalibrationSettings,
    pub worker: WorkerSettings,
}

impl RegimeSettings {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Feature windows
        let f = &self.features;
        for (name, period) in [
            ("atr_period", f.atr_period),
            ("bollinger_period", f.bollinger_period),
            ("adx_period", f.adx_period),
            ("momentum_window", f.momentum_window),
        ] {
            if period == 0 {
                errors.push(format!("features: {} must be > 0", name));
            }
        }
        if f.skew_window < 3 {
            errors.push("features: skew_window must be >= 3".to_string());
        }
        if f.volume_window < 2 {
            errors.push("features: volume_window must be >= 2".to_string());
        }
        if !(f.bollinger_std_dev > 0.0 && f.bollinger_std_dev.is_finite()) {
            errors.push("features: bollinger_std_dev must be > 0".to_string());
        }

        // HMM
        if self.hmm.max_iterations == 0 {
            errors.push("hmm: max_iterations must be > 0".to_string());
        }
        if !(self.hmm.tolerance > 0.0 && self.hmm.tolerance.is_finite()) {
            errors.push("hmm: tolerance must be > 0".to_string());
        }
        if self.hmm.min_observations < 2 {
            errors.push("hmm: min_observations must be >= 2".to_string());
        }

        // Calibration
        if self.calibration.steps < 2 {
            errors.push("calibration: steps must be >= 2".to_string());
        }
        if !(0.0..=10.0).contains(&self.calibration.anchor_value) {
            errors.push("calibration: anchor_value must be between 0 and 10".to_string());
        }

        // Worker
        if !(0.0..=10.0).contains(&self.worker.default_slider) {
            errors.push("worker: default_slider must be between 0 and 10".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    pub atr_period: usize,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
    pub adx_period: usize,
    pub skew_window: usize,
    pub volume_window: usize,
    /// Trailing bars used for promotion direction and efficiency
    pub momentum_window: usize,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            atr_period: 14,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            adx_period: 14,
            skew_window: 20,
            volume_window: 20,
            momentum_window: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HmmSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Below this many usable observations no model is trained
    pub min_observations: usize,
}

impl Default for HmmSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-4,
            min_observations: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    pub steps: usize,
    pub anchor_value: f64,
    pub parallel: bool,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            steps: 1000,
            anchor_value: 5.0,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub debounce_ms: u64,
    pub default_slider: f64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 120,
            default_slider: 5.0,
        }
    }
}

/// Load settings from an optional TOML file, then `REGIME_*` environment
/// overrides (`REGIME_HMM__MAX_ITERATIONS=50`). A `.env` file is read first.
pub fn load_settings(path: Option<&Path>) -> RegimeResult<RegimeSettings> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();
    if let Some(path) = path {
        debug!("Reading settings from {}", path.display());
        builder = builder.add_source(File::from(path).required(false));
    }
    builder = builder.add_source(
        Environment::with_prefix("REGIME")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let settings: RegimeSettings = builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| RegimeError::InvalidSettings(vec![e.to_string()]))?;

    settings.validate().map_err(RegimeError::InvalidSettings)?;

    info!(
        "Settings loaded: calibration steps={}, debounce={}ms",
        settings.calibration.steps, settings.worker.debounce_ms
    );
    Ok(settings)
}
