//! Test Utilities Crate
//!
//! Shared test infrastructure for the settlement test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built test data for directory and package summaries
//! - `builders`: Builder patterns for invoice construction
//! - `assertions`: Custom assertion helpers for monetary invariants

pub mod assertions;
pub mod builders;
pub mod fixtures;

pub use assertions::*;
pub use builders::*;
pub use fixtures::*;
