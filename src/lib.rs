//! Market-regime overlay engine.
//!
//! Classifies each day of a backtested series as bull-trending,
//! bear-trending or range-bound using a 4-state Gaussian HMM plus a
//! deterministic rule layer driven by one sensitivity slider.

pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod ml;
pub mod regime;
pub mod types;

pub use error::{RegimeError, RegimeResult};
