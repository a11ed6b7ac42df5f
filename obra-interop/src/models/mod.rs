//! Data models for the interoperability pipeline

pub mod ledger;
pub mod outcome;
pub mod record;
pub mod settlement;
pub mod validation;

pub use ledger::*;
pub use outcome::*;
pub use record::*;
pub use settlement::*;
pub use validation::*;
