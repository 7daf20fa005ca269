//! Shared types and domain logic for the Farm Operations Platform
//!
//! This crate contains the pure parts of the inventory valuation and cost
//! propagation engine: record lifecycle types, costing arithmetic, and
//! validation helpers. Everything here is usable without a database.

pub mod costing;
pub mod types;
pub mod validation;

pub use costing::*;
pub use types::*;
pub use validation::*;
