//! Core types for Sortie.

pub mod exchange;
pub mod instruction;
pub mod message;

pub use exchange::*;
pub use instruction::*;
pub use message::*;
