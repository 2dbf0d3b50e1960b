pub mod gaussian_hmm;
pub mod label_map;
pub mod model;

pub use gaussian_hmm::{GaussianHMM, FitOutcome, N_STATES};
pub use label_map::RegimeLabelMap;
pub use model::{train_regime_model, HmmDiagnostics, HmmModel};
