//! Dataflow analysis and source emission for the Brio compile backend.
//!
//! The pipeline through this crate is: run [`analysis`] over a parsed
//! program to learn which variables are definitely assigned where, then
//! drive [`unit::UnitGenerator`] to turn the program into one generated
//! source unit, deduplicating constants and wiring runtime ids through
//! [`symbols::SymbolTable`].

pub mod analysis;
pub mod error;
pub mod symbols;
pub mod unit;
pub mod writer;

pub use error::CodegenError;
pub use unit::{generate, GenerateOptions, GeneratedUnit, UnitGenerator};
