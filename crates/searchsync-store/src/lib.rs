//! SQLite implementation of the record store, change log and watermark store.
//!
//! Every mutation made through [`SqliteStore`] appends its change-log row in
//! the same `BEGIN IMMEDIATE` transaction, so the log can never miss a
//! committed write and sequence order equals commit order.

mod change_log;
mod predicate_sql;
mod store;
mod watermarks;

pub use predicate_sql::where_clause;
pub use store::SqliteStore;
