//! Core of the security master: the bitemporal document model, the
//! identifier scheme, time sources and the SQLite-backed store.
//!
//! Every security is a logical object whose history is kept as rows along two
//! time axes. The version axis records when a state was valid; the correction
//! axis records when the store believed it. Nothing is ever deleted, rows are
//! only closed by setting their terminal instants.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod identity;
pub mod model;
pub mod schema;
pub mod time;

pub use error::{Error, Result};
pub use identity::{IdentityScheme, Resolution, VersionRef, DEFAULT_SCHEME};
pub use model::{
    ExternalId, IdentifierBundle, ObjectId, Paging, PagingRequest, Security, SecurityDocument,
    UniqueId, VersionCorrection, VersionedRecord,
};
pub use schema::{IntervalQuery, SearchQuery, Store, StoreTxn};
pub use time::{FixedTimeSource, SystemTimeSource, TimeSource};
