//! Report rendering.

mod generator;

pub use generator::*;
