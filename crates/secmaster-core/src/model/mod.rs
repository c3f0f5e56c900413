pub mod document;
pub mod ids;
pub mod paging;
pub mod record;
pub mod security;

pub use document::SecurityDocument;
pub use ids::{ObjectId, UniqueId, VersionCorrection};
pub use paging::{Paging, PagingRequest};
pub use record::VersionedRecord;
pub use security::{ExternalId, IdentifierBundle, Security};
