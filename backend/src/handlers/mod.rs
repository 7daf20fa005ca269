//! HTTP handlers for the Farm Operations Platform

pub mod archive;
pub mod audit;
pub mod catalog;
pub mod formula;
pub mod health;
pub mod inventory;
pub mod manufacturing;
pub mod purchase;

pub use archive::*;
pub use audit::*;
pub use catalog::*;
pub use formula::*;
pub use health::*;
pub use inventory::*;
pub use manufacturing::*;
pub use purchase::*;
