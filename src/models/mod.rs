//! Wire and domain models

pub mod sample;
pub mod prediction;
pub mod detection;

pub use sample::*;
pub use prediction::*;
pub use detection::*;
