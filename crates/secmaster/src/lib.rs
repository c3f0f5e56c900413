//! A bitemporal security master.
//!
//! Securities are versioned along business time and corrected along
//! knowledge time. Every write closes the row it supersedes instead of
//! rewriting it, so any past state can be queried as it was known at any
//! past instant.
//!
//! ```no_run
//! use secmaster::{SecurityMaster, Security, HistoryRequest};
//!
//! # fn main() -> secmaster::Result<()> {
//! let mut master = SecurityMaster::open_in_memory()?;
//! let added = master.add(&Security::new("ACME", "EQUITY"))?;
//! let updated = master.update(&added.unique_id, &Security::new("ACME Corp", "EQUITY"))?;
//! let history = master.history(&HistoryRequest::new(updated.object_id().clone()))?;
//! assert_eq!(history.documents.len(), 2);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod changes;
pub mod config;
pub mod master;
pub mod modify;
pub mod query;
pub mod request;

pub use changes::{ChangeEvent, ChangeListener, ChangeManager, ChangeType};
pub use config::MasterConfig;
pub use master::SecurityMaster;
pub use modify::ModifyWorker;
pub use query::QueryWorker;
pub use request::{HistoryRequest, HistoryResult, SearchRequest, SearchResult};
pub use secmaster_core::{
    Error, ExternalId, FixedTimeSource, IdentifierBundle, IdentityScheme, ObjectId, Paging,
    PagingRequest, Result, Security, SecurityDocument, Store, SystemTimeSource, TimeSource,
    UniqueId, VersionCorrection,
};
