//! Shared model of the sync engine: records, the change log, index schemas,
//! field extraction, and the store/backend traits everything else plugs into.

pub mod config;
pub mod error;
pub mod extract;
pub mod predicate;
pub mod query;
pub mod registry;
pub mod schema;
pub mod traits;
pub mod types;

pub use error::{Error, ExtractionError, Result};
