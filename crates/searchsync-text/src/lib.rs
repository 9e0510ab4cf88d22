//! Tantivy implementation of `SearchBackend`.
pub mod tantivy_utils;
pub mod index;
pub mod search;
mod spelling;

pub use index::{TantivyIndex, TantivyWriteConnection};
