//! Agent loop primitives (cycles, the in-progress guard).

pub mod runner;
pub mod types;

pub use runner::*;
pub use types::*;
