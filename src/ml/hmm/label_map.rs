use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::gaussian_hmm::N_STATES;
use crate::types::{DayLabel, RegimeLabel, Volatility};

/// Bijection between HMM state indices and semantic regime labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeLabelMap {
    state_by_label: [usize; N_STATES],
    label_by_state: [RegimeLabel; N_STATES],
}

impl RegimeLabelMap {
    /// Rank states by mean return; the lower two are bear, the upper two
    /// bull, and within each pair the lower mean volatility is low-vol.
    pub fn from_means(means: &Array2<f64>, return_dim: usize, volatility_dim: usize) -> Self {
        let mut ranked: Vec<(usize, f64, f64)> = (0..means.nrows().min(N_STATES))
            .map(|s| (s, means[[s, return_dim]], means[[s, volatility_dim]]))
            .filter(|(_, ret, vol)| ret.is_finite() && vol.is_finite())
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let split = ranked.len() / 2;
        let (bears, bulls) = ranked.split_at(split);

        let mut assigned: [Option<usize>; N_STATES] = [None; N_STATES];
        assign_pair(&mut assigned, bears, RegimeLabel::BearLowVol, RegimeLabel::BearHighVol);
        assign_pair(&mut assigned, bulls, RegimeLabel::BullLowVol, RegimeLabel::BullHighVol);

        // Unresolved labels take the first unused state index.
        let mut used = [false; N_STATES];
        for state in assigned.iter().flatten() {
            used[*state] = true;
        }
        let mut state_by_label = [0; N_STATES];
        for label in RegimeLabel::ALL {
            let state = match assigned[label.index()] {
                Some(s) => s,
                None => {
                    let free = used.iter().position(|u| !u).unwrap_or(0);
                    used[free] = true;
                    free
                }
            };
            state_by_label[label.index()] = state;
        }

        let mut label_by_state = [RegimeLabel::BullHighVol; N_STATES];
        for label in RegimeLabel::ALL {
            label_by_state[state_by_label[label.index()]] = label;
        }

        Self {
            state_by_label,
            label_by_state,
        }
    }

    pub fn state_for(&self, label: RegimeLabel) -> usize {
        self.state_by_label[label.index()]
    }

    pub fn label_for(&self, state: usize) -> Option<RegimeLabel> {
        self.label_by_state.get(state).copied()
    }

    /// The two states carrying high-volatility labels.
    pub fn high_vol_states(&self) -> [usize; 2] {
        [
            self.state_for(RegimeLabel::BullHighVol),
            self.state_for(RegimeLabel::BearHighVol),
        ]
    }

    /// States whose label displays as `day`.
    pub fn states_for_day(&self, day: DayLabel) -> Vec<usize> {
        RegimeLabel::ALL
            .into_iter()
            .filter(|l| l.display() == day)
            .map(|l| self.state_for(l))
            .collect()
    }
}

fn assign_pair(
    assigned: &mut [Option<usize>; N_STATES],
    group: &[(usize, f64, f64)],
    low: RegimeLabel,
    high: RegimeLabel,
) {
    debug_assert_eq!(low.volatility(), Volatility::Low);
    match group {
        [] => {}
        [(state, _, _)] => assigned[low.index()] = Some(*state),
        [a, b, ..] => {
            let (low_state, high_state) = if b.2 < a.2 { (b.0, a.0) } else { (a.0, b.0) };
            assigned[low.index()] = Some(low_state);
            assigned[high.index()] = Some(high_state);
        }
    }
}
