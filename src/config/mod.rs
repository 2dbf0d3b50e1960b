pub mod settings;
pub mod manager;

pub use settings::*;
pub use manager::*;
