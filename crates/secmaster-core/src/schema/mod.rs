//! Persistence of the bitemporal history.

mod dialect;
mod migrations;
mod store;

pub use dialect::{wildcard_to_like, Dialect, SqliteDialect, DOCUMENT_COLUMNS};
pub use migrations::{Migration, MIGRATIONS};
pub use store::{IntervalQuery, RecordId, SearchQuery, Store, StoreTxn};
