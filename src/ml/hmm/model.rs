use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

use super::gaussian_hmm::{GaussianHMM, N_STATES};
use super::label_map::RegimeLabelMap;
use crate::config::HmmSettings;
use crate::error::{RegimeError, RegimeResult};
use crate::ml::features::{ObservationSet, HMM_DIMS, RETURN_DIM, VOLATILITY_DIM};
use crate::types::{DayLabel, RegimeLabel};

/// Share of observations above which a single state marks the model degenerate.
const DEGENERATE_STATE_PCT: f64 = 95.0;

/// Training diagnostics shown in the regime summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HmmDiagnostics {
    pub iterations: usize,
    pub log_likelihood: f64,
    pub observations: usize,
    pub converged: bool,
    pub degenerate_events: usize,
    /// Observations per state under the posterior argmax
    pub state_counts: [usize; N_STATES],
}

impl HmmDiagnostics {
    pub fn dominant_state_pct(&self) -> f64 {
        let max = self.state_counts.iter().max().copied().unwrap_or(0);
        if self.observations == 0 {
            0.0
        } else {
            max as f64 / self.observations as f64 * 100.0
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.dominant_state_pct() > DEGENERATE_STATE_PCT
    }
}

/// A trained HMM with its posteriors over the training observations.
#[derive(Debug, Clone)]
pub struct HmmModel {
    pub hmm: GaussianHMM,
    /// One row per observation in the `ObservationSet` it was trained on
    pub posteriors: Array2<f64>,
    pub states: Vec<usize>,
    pub label_map: RegimeLabelMap,
    pub diagnostics: HmmDiagnostics,
}

impl HmmModel {
    pub fn posterior_row(&self, row: usize) -> Option<ArrayView1<'_, f64>> {
        (row < self.posteriors.nrows()).then(|| self.posteriors.row(row))
    }

    /// Semantic label of the posterior-argmax state for an observation row.
    pub fn label_for_row(&self, row: usize) -> Option<RegimeLabel> {
        self.states.get(row).and_then(|&s| self.label_map.label_for(s))
    }

    /// Posterior mass on the two high-volatility states.
    pub fn high_vol_mass(&self, row: usize) -> Option<f64> {
        let posterior = self.posterior_row(row)?;
        Some(self.label_map.high_vol_states().iter().map(|&s| posterior[s]).sum())
    }

    /// Largest posterior among the states consistent with `day`, falling
    /// back to the largest posterior overall.
    pub fn confidence(&self, row: usize, day: DayLabel) -> Option<f64> {
        let posterior = self.posterior_row(row)?;
        let consistent = self.label_map.states_for_day(day);
        let best = consistent
            .iter()
            .filter_map(|&s| posterior.get(s).copied())
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))));
        best.or_else(|| posterior.iter().copied().reduce(f64::max))
    }

    /// Model parameters as JSON, in the layout the training CLI writes.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "model_type": "HMM",
            "n_states": self.hmm.n_states,
            "n_features": self.hmm.n_features,
            "transition": self.hmm.transition.iter().copied().collect::<Vec<f64>>(),
            "start_prob": self.hmm.start_prob.to_vec(),
            "means": self.hmm.means.iter().copied().collect::<Vec<f64>>(),
            "variances": self.hmm.variances.iter().copied().collect::<Vec<f64>>(),
            "labels": RegimeLabel::ALL
                .iter()
                .map(|l| (format!("{:?}", l), self.label_map.state_for(*l)))
                .collect::<std::collections::BTreeMap<_, _>>(),
            "diagnostics": self.diagnostics,
        })
    }
}

/// Fit the 4-state regime HMM on standardized observations.
///
/// Returns `InsufficientData` below `settings.min_observations`; every
/// numeric problem during EM is recovered and counted instead.
pub fn train_regime_model(observations: &ObservationSet, settings: &HmmSettings) -> RegimeResult<HmmModel> {
    let n_obs = observations.len();
    if n_obs < settings.min_observations.max(2) {
        return Err(RegimeError::InsufficientData {
            required: settings.min_observations.max(2),
            actual: n_obs,
        });
    }

    let data = observations.to_array();
    let mut hmm = GaussianHMM::new(HMM_DIMS).with_limits(settings.max_iterations, settings.tolerance);

    debug!("Initializing HMM with median split on {} observations", n_obs);
    hmm.init_with_median_split(&data, RETURN_DIM, VOLATILITY_DIM)?;

    let start_time = Instant::now();
    let outcome = hmm.fit(&data)?;
    debug!(
        "Baum-Welch finished in {:.1}ms: {} iterations, log-likelihood {:.2}",
        start_time.elapsed().as_secs_f64() * 1000.0,
        outcome.iterations,
        outcome.log_likelihood
    );
    if outcome.degenerate_events > 0 {
        debug!("Recovered {} degenerate values during training", outcome.degenerate_events);
    }

    let states = GaussianHMM::posterior_argmax(&outcome.posteriors);
    let mut state_counts = [0usize; N_STATES];
    for &state in &states {
        if state < N_STATES {
            state_counts[state] += 1;
        }
    }

    let label_map = RegimeLabelMap::from_means(&hmm.means, RETURN_DIM, VOLATILITY_DIM);

    let diagnostics = HmmDiagnostics {
        iterations: outcome.iterations,
        log_likelihood: outcome.log_likelihood,
        observations: n_obs,
        converged: outcome.converged,
        degenerate_events: outcome.degenerate_events,
        state_counts,
    };

    info!(
        "HMM trained: {} observations, {} iterations, converged={}",
        n_obs, diagnostics.iterations, diagnostics.converged
    );
    if diagnostics.is_degenerate() {
        warn!(
            "Model may be degenerate (one state covers {:.1}% of data)",
            diagnostics.dominant_state_pct()
        );
    }

    Ok(HmmModel {
        hmm,
        posteriors: outcome.posteriors,
        states,
        label_map,
        diagnostics,
    })
}
