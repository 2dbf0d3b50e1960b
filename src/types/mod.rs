pub mod bar;
pub mod regime;

pub use bar::*;
pub use regime::*;
