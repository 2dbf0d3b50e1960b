use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::f64::consts::PI;
use tracing::debug;

use crate::error::{RegimeError, RegimeResult};
use crate::indicators::median;

/// Number of hidden states.
pub const N_STATES: usize = 4;
/// Lower bound for every per-dimension variance.
pub const MIN_VARIANCE: f64 = 1e-6;
/// Lower bound for scaled emission likelihoods.
pub const EMISSION_FLOOR: f64 = 1e-12;

const SELF_TRANSITION: f64 = 0.7;

/// 4-state Hidden Markov Model with diagonal-covariance Gaussian emissions.
#[derive(Debug, Clone)]
pub struct GaussianHMM {
    /// Number of hidden states (always 4)
    pub n_states: usize,
    /// Number of features (observation dimensions)
    pub n_features: usize,
    /// State transition matrix (4x4), rows sum to 1
    pub transition: Array2<f64>,
    /// Initial state probabilities (4)
    pub start_prob: Array1<f64>,
    /// Mean vectors for each state (4 x n_features)
    pub means: Array2<f64>,
    /// Per-dimension variances for each state (4 x n_features)
    pub variances: Array2<f64>,
    /// Convergence tolerance on the log-likelihood
    pub tol: f64,
    /// Maximum EM iterations
    pub max_iter: usize,
}

/// Result of one forward-backward pass.
#[derive(Debug, Clone)]
pub struct Expectation {
    /// State posteriors, one row per observation, rows sum to 1
    pub gamma: Array2<f64>,
    /// Expected transition counts summed over time
    pub xi_sum: Array2<f64>,
    pub log_likelihood: f64,
    /// Number of substituted non-finite or zero intermediate values
    pub degenerate: usize,
}

/// Outcome of Baum-Welch training.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub iterations: usize,
    pub log_likelihood: f64,
    pub converged: bool,
    pub degenerate_events: usize,
    /// Posteriors under the final parameters
    pub posteriors: Array2<f64>,
}

impl GaussianHMM {
    /// Create a model with uniform start probabilities, sticky transitions
    /// and unit variances.
    pub fn new(n_features: usize) -> Self {
        let n_states = N_STATES;
        let off_diagonal = (1.0 - SELF_TRANSITION) / (n_states - 1) as f64;

        let mut transition = Array2::from_elem((n_states, n_states), off_diagonal);
        for i in 0..n_states {
            transition[[i, i]] = SELF_TRANSITION;
        }

        Self {
            n_states,
            n_features,
            transition,
            start_prob: Array1::from_elem(n_states, 1.0 / n_states as f64),
            means: Array2::zeros((n_states, n_features)),
            variances: Array2::ones((n_states, n_features)),
            tol: 1e-4,
            max_iter: 100,
        }
    }

    pub fn with_limits(mut self, max_iter: usize, tol: f64) -> Self {
        self.max_iter = max_iter.max(1);
        self.tol = tol;
        self
    }

    /// Seed means and variances from a hard median split.
    ///
    /// State `2 * (return >= median) + (volatility >= median)` receives each
    /// observation, so state 0 is low-return/low-vol and state 3 is
    /// high-return/high-vol. Buckets with fewer than two members fall back to
    /// the global column statistics.
    pub fn init_with_median_split(
        &mut self,
        observations: &Array2<f64>,
        return_dim: usize,
        volatility_dim: usize,
    ) -> RegimeResult<()> {
        self.check_shape(observations)?;
        let n_obs = observations.nrows();
        if n_obs == 0 {
            return Err(RegimeError::InsufficientData { required: 1, actual: 0 });
        }

        let return_median = median(observations.column(return_dim).iter().copied()).unwrap_or(0.0);
        let vol_median = median(observations.column(volatility_dim).iter().copied()).unwrap_or(0.0);

        let labels: Vec<usize> = observations
            .rows()
            .into_iter()
            .map(|row| {
                let high_return = row[return_dim] >= return_median;
                let high_vol = row[volatility_dim] >= vol_median;
                2 * usize::from(high_return) + usize::from(high_vol)
            })
            .collect();

        let global_mean = column_means(observations.view(), None);
        let global_var = column_variances(observations.view(), &global_mean, None);

        for state in 0..self.n_states {
            let members: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|(_, l)| **l == state)
                .map(|(i, _)| i)
                .collect();

            let (mean, var) = if members.len() >= 2 {
                let mean = column_means(observations.view(), Some(&members));
                let var = column_variances(observations.view(), &mean, Some(&members));
                (mean, var)
            } else {
                (global_mean.clone(), global_var.clone())
            };

            for j in 0..self.n_features {
                self.means[[state, j]] = finite_or(mean[j], 0.0);
                self.variances[[state, j]] = finite_or(var[j], 1.0).max(MIN_VARIANCE);
            }
        }

        let off_diagonal = (1.0 - SELF_TRANSITION) / (self.n_states - 1) as f64;
        self.transition.fill(off_diagonal);
        for i in 0..self.n_states {
            self.transition[[i, i]] = SELF_TRANSITION;
        }
        self.start_prob.fill(1.0 / self.n_states as f64);

        Ok(())
    }

    fn check_shape(&self, observations: &Array2<f64>) -> RegimeResult<()> {
        if observations.ncols() != self.n_features {
            return Err(RegimeError::NumericDegeneracy {
                stage: "shape",
                detail: format!(
                    "expected {} features, got {}",
                    self.n_features,
                    observations.ncols()
                ),
            });
        }
        Ok(())
    }

    /// Log density of one observation under a state's diagonal Gaussian.
    fn log_emission_prob(&self, obs: ArrayView1<f64>, state: usize) -> f64 {
        let mut log_p = 0.0;
        for j in 0..self.n_features {
            let var = self.variances[[state, j]].max(MIN_VARIANCE);
            let diff = obs[j] - self.means[[state, j]];
            log_p -= 0.5 * ((2.0 * PI * var).ln() + diff * diff / var);
        }
        log_p
    }

    /// Emission likelihoods shifted by each row's maximum log density.
    /// Returns the scaled matrix and the per-row shifts.
    fn scaled_emissions(&self, observations: &Array2<f64>, degenerate: &mut usize) -> (Array2<f64>, Vec<f64>) {
        let n_obs = observations.nrows();
        let mut emissions = Array2::zeros((n_obs, self.n_states));
        let mut shifts = vec![0.0; n_obs];

        for (t, obs) in observations.rows().into_iter().enumerate() {
            let logs: Vec<f64> = (0..self.n_states).map(|s| self.log_emission_prob(obs, s)).collect();
            let max_log = logs.iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max);
            let shift = if max_log.is_finite() {
                max_log
            } else {
                *degenerate += 1;
                0.0
            };
            shifts[t] = shift;
            for (s, &log_p) in logs.iter().enumerate() {
                let value = (log_p - shift).exp();
                emissions[[t, s]] = finite_or(value, EMISSION_FLOOR).max(EMISSION_FLOOR);
            }
        }

        (emissions, shifts)
    }

    /// Scaled forward-backward pass (E-step).
    pub fn expectation(&self, observations: &Array2<f64>) -> Expectation {
        let n_obs = observations.nrows();
        let n = self.n_states;
        let mut degenerate = 0;

        let (emissions, shifts) = self.scaled_emissions(observations, &mut degenerate);

        let mut alpha = Array2::zeros((n_obs, n));
        let mut scales = vec![1.0; n_obs];

        for t in 0..n_obs {
            for j in 0..n {
                let prior = if t == 0 {
                    self.start_prob[j]
                } else {
                    (0..n).map(|i| alpha[[t - 1, i]] * self.transition[[i, j]]).sum()
                };
                alpha[[t, j]] = prior * emissions[[t, j]];
            }
            let c: f64 = alpha.row(t).sum();
            if c > 0.0 && c.is_finite() {
                alpha.row_mut(t).mapv_inplace(|a| a / c);
                scales[t] = c;
            } else {
                degenerate += 1;
                alpha.row_mut(t).fill(1.0 / n as f64);
                scales[t] = EMISSION_FLOOR;
            }
        }

        let mut beta = Array2::ones((n_obs, n));
        for t in (0..n_obs.saturating_sub(1)).rev() {
            for i in 0..n {
                let value: f64 = (0..n)
                    .map(|j| self.transition[[i, j]] * emissions[[t + 1, j]] * beta[[t + 1, j]])
                    .sum::<f64>()
                    / scales[t + 1];
                beta[[t, i]] = finite_or(value, 1.0);
            }
        }

        let mut gamma = &alpha * &beta;
        for mut row in gamma.rows_mut() {
            if !normalize(row.iter_mut()) {
                degenerate += 1;
                row.fill(1.0 / n as f64);
            }
        }

        let mut xi_sum = Array2::zeros((n, n));
        let mut xi_t = Array2::zeros((n, n));
        for t in 0..n_obs.saturating_sub(1) {
            for i in 0..n {
                for j in 0..n {
                    xi_t[[i, j]] = alpha[[t, i]]
                        * self.transition[[i, j]]
                        * emissions[[t + 1, j]]
                        * beta[[t + 1, j]]
                        / scales[t + 1];
                }
            }
            let total = xi_t.sum();
            if total > 0.0 && total.is_finite() {
                xi_sum.scaled_add(1.0 / total, &xi_t);
            } else {
                degenerate += 1;
            }
        }

        let log_likelihood = scales
            .iter()
            .zip(shifts.iter())
            .map(|(c, shift)| c.ln() + shift)
            .sum();

        Expectation {
            gamma,
            xi_sum,
            log_likelihood,
            degenerate,
        }
    }

    /// Re-estimate parameters from an E-step (M-step). Returns the number
    /// of degenerate substitutions.
    fn maximize(&mut self, observations: &Array2<f64>, e: &Expectation) -> usize {
        let n = self.n_states;
        let mut degenerate = 0;

        let mut start: Vec<f64> = e.gamma.row(0).to_vec();
        if !normalize(start.iter_mut()) {
            degenerate += 1;
            start = vec![1.0 / n as f64; n];
        }
        self.start_prob = Array1::from_vec(start);

        for i in 0..n {
            let mut row: Vec<f64> = e.xi_sum.row(i).to_vec();
            if !normalize(row.iter_mut()) {
                degenerate += 1;
                row = vec![1.0 / n as f64; n];
            }
            for j in 0..n {
                self.transition[[i, j]] = row[j];
            }
        }

        for state in 0..n {
            let weights = e.gamma.column(state);
            let weight_sum: f64 = weights.sum();
            if !(weight_sum > 1e-10 && weight_sum.is_finite()) {
                degenerate += 1;
                continue;
            }

            for feat in 0..self.n_features {
                let column = observations.column(feat);
                let mean = weights.iter().zip(column.iter()).map(|(w, x)| w * x).sum::<f64>() / weight_sum;
                let var = weights
                    .iter()
                    .zip(column.iter())
                    .map(|(w, x)| w * (x - mean).powi(2))
                    .sum::<f64>()
                    / weight_sum;

                if mean.is_finite() {
                    self.means[[state, feat]] = mean;
                } else {
                    degenerate += 1;
                }
                self.variances[[state, feat]] = finite_or(var, MIN_VARIANCE).max(MIN_VARIANCE);
            }
        }

        degenerate
    }

    /// Train with Baum-Welch EM starting from the current parameters.
    ///
    /// Stops after `max_iter` E-steps or once the log-likelihood moves by
    /// less than `tol`. A non-finite log-likelihood keeps the previous value.
    pub fn fit(&mut self, observations: &Array2<f64>) -> RegimeResult<FitOutcome> {
        self.check_shape(observations)?;
        let n_obs = observations.nrows();
        if n_obs < 2 {
            return Err(RegimeError::InsufficientData { required: 2, actual: n_obs });
        }

        let mut prev_log_prob: Option<f64> = None;
        let mut degenerate_events = 0;
        let mut converged = false;
        let mut iterations = 0;
        let mut current: Option<Expectation> = None;

        for iteration in 0..self.max_iter {
            let e = self.expectation(observations);
            iterations = iteration + 1;
            degenerate_events += e.degenerate;

            let log_prob = if e.log_likelihood.is_finite() {
                e.log_likelihood
            } else {
                degenerate_events += 1;
                debug!("Non-finite log-likelihood at iteration {}", iterations);
                prev_log_prob.unwrap_or(f64::MIN)
            };

            if let Some(prev) = prev_log_prob {
                if (log_prob - prev).abs() < self.tol {
                    converged = true;
                    prev_log_prob = Some(log_prob);
                    current = Some(e);
                    break;
                }
            }
            prev_log_prob = Some(log_prob);

            degenerate_events += self.maximize(observations, &e);
        }

        let final_e = match current {
            Some(e) => e,
            None => {
                let e = self.expectation(observations);
                degenerate_events += e.degenerate;
                e
            }
        };

        let log_likelihood = if final_e.log_likelihood.is_finite() {
            final_e.log_likelihood
        } else {
            prev_log_prob.unwrap_or(f64::MIN)
        };

        Ok(FitOutcome {
            iterations,
            log_likelihood,
            converged,
            degenerate_events,
            posteriors: final_e.gamma,
        })
    }

    /// Most probable state per timestep from posteriors (not Viterbi).
    pub fn posterior_argmax(posteriors: &Array2<f64>) -> Vec<usize> {
        posteriors
            .axis_iter(Axis(0))
            .map(|row| {
                let mut best = 0;
                for (s, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = s;
                    }
                }
                best
            })
            .collect()
    }
}

/// Normalize values in place to sum to 1. Returns `false` (leaving the
/// values untouched) when the sum is zero or non-finite.
fn normalize<'a>(values: impl Iterator<Item = &'a mut f64>) -> bool {
    let values: Vec<&mut f64> = values.collect();
    let sum: f64 = values.iter().map(|v| **v).sum();
    if !(sum > 0.0 && sum.is_finite()) {
        return false;
    }
    for v in values {
        *v /= sum;
    }
    true
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn column_means(observations: ArrayView2<f64>, rows: Option<&[usize]>) -> Vec<f64> {
    let selected: Vec<usize> = match rows {
        Some(r) => r.to_vec(),
        None => (0..observations.nrows()).collect(),
    };
    let n = selected.len().max(1) as f64;
    (0..observations.ncols())
        .map(|j| selected.iter().map(|&i| observations[[i, j]]).sum::<f64>() / n)
        .collect()
}

fn column_variances(observations: ArrayView2<f64>, means: &[f64], rows: Option<&[usize]>) -> Vec<f64> {
    let selected: Vec<usize> = match rows {
        Some(r) => r.to_vec(),
        None => (0..observations.nrows()).collect(),
    };
    let n = selected.len().max(1) as f64;
    (0..observations.ncols())
        .map(|j| {
            let var = selected
                .iter()
                .map(|&i| (observations[[i, j]] - means[j]).powi(2))
                .sum::<f64>()
                / n;
            var.max(MIN_VARIANCE)
        })
        .collect()
}
