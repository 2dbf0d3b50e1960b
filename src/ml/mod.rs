pub mod features;
pub mod hmm;

pub use features::{extract_features, trailing_momentum, FeatureRow, Momentum, Observation, ObservationSet};
pub use hmm::{train_regime_model, GaussianHMM, HmmDiagnostics, HmmModel, RegimeLabelMap};
