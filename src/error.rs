use thiserror::Error;

/// Conditions raised by the regime engine.
///
/// Only `NoPriceData` and `InvalidSettings` are meant to reach an end user;
/// everything else is recovered inside the pipeline and reported through
/// diagnostics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegimeError {
    #[error("Insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Numeric degeneracy in {stage}: {detail}")]
    NumericDegeneracy { stage: &'static str, detail: String },

    #[error("Bar {index} is missing field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("Classification requested before any regime base exists")]
    StaleBase,

    #[error("No usable price data in series")]
    NoPriceData,

    #[error("Invalid settings: {}", .0.join(", "))]
    InvalidSettings(Vec<String>),
}

pub type RegimeResult<T> = std::result::Result<T, RegimeError>;
