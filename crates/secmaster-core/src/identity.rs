//! Mapping between public identifiers and store keys.
//!
//! Every identifier handed out by a master carries the master's scheme; the
//! object id value is the numeric key of the logical object in the store.
//! All "latest" resolution goes through [`IdentityScheme::resolve`].

use crate::error::{Error, Result};
use crate::model::{ObjectId, SecurityDocument, UniqueId, VersionedRecord};

/// Default scheme for identifiers issued by a database-backed master.
pub const DEFAULT_SCHEME: &str = "DbSec";

/// What a [`UniqueId`] points at once decoded against a scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Latest version, latest correction.
    Latest { object_id: i64 },
    /// One version, its latest correction.
    Version { object_id: i64, version: u32 },
    /// One exact row.
    Exact {
        object_id: i64,
        version: u32,
        correction: u32,
    },
}

impl Resolution {
    #[must_use]
    pub const fn object_id(&self) -> i64 {
        match *self {
            Self::Latest { object_id }
            | Self::Version { object_id, .. }
            | Self::Exact { object_id, .. } => object_id,
        }
    }
}

/// A [`UniqueId`] that names a version, optionally down to one correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRef {
    pub object_id: i64,
    pub version: u32,
    /// `None` selects the open correction of the version.
    pub correction: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityScheme {
    scheme: String,
}

impl IdentityScheme {
    pub fn new(scheme: impl Into<String>) -> Result<Self> {
        let scheme = scheme.into();
        // validates the scheme text
        ObjectId::of(scheme.as_str(), "0")?;
        Ok(Self { scheme })
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn object_id(&self, object_id: i64) -> ObjectId {
        ObjectId::of(self.scheme.as_str(), object_id.to_string())
            .unwrap_or_else(|_| unreachable!("scheme validated at construction"))
    }

    #[must_use]
    pub fn unique_id(&self, object_id: i64, version: u32, correction: u32) -> UniqueId {
        UniqueId::of(self.scheme.as_str(), object_id.to_string(), version, correction)
            .unwrap_or_else(|_| unreachable!("scheme validated at construction"))
    }

    /// The identifier that always resolves to the current row of `object_id`.
    #[must_use]
    pub fn resolve_latest(&self, object_id: &ObjectId) -> UniqueId {
        object_id.at_latest_version()
    }

    pub fn check_scheme(&self, object_id: &ObjectId) -> Result<()> {
        if object_id.scheme() == self.scheme {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "scheme must be {}: {object_id}",
                self.scheme
            )))
        }
    }

    /// Extracts the numeric store key from an object id of this scheme.
    pub fn extract_oid(&self, object_id: &ObjectId) -> Result<i64> {
        self.check_scheme(object_id)?;
        match object_id.value().parse::<i64>() {
            Ok(oid) if oid > 0 => Ok(oid),
            _ => Err(Error::InvalidArgument(format!(
                "object id value must be a positive integer: {object_id}"
            ))),
        }
    }

    pub fn resolve(&self, unique_id: &UniqueId) -> Result<Resolution> {
        let object_id = self.extract_oid(unique_id.object_id())?;
        Ok(match (unique_id.version(), unique_id.correction()) {
            (None, _) => Resolution::Latest { object_id },
            (Some(version), None) => Resolution::Version { object_id, version },
            (Some(version), Some(correction)) => Resolution::Exact {
                object_id,
                version,
                correction,
            },
        })
    }

    /// Like [`resolve`](Self::resolve) but insists on a version number, as
    /// required by every modification.
    pub fn resolve_versioned(&self, unique_id: &UniqueId) -> Result<VersionRef> {
        match self.resolve(unique_id)? {
            Resolution::Latest { .. } => Err(Error::InvalidArgument(format!(
                "unique id must be versioned: {unique_id}"
            ))),
            Resolution::Version { object_id, version } => Ok(VersionRef {
                object_id,
                version,
                correction: None,
            }),
            Resolution::Exact {
                object_id,
                version,
                correction,
            } => Ok(VersionRef {
                object_id,
                version,
                correction: Some(correction),
            }),
        }
    }

    #[must_use]
    pub fn document(&self, record: VersionedRecord) -> SecurityDocument {
        SecurityDocument {
            unique_id: self.unique_id(
                record.object_id,
                record.version_number,
                record.correction_number,
            ),
            security: record.payload,
            version_from_instant: record.version_from_instant,
            version_to_instant: record.version_to_instant,
            correction_from_instant: record.correction_from_instant,
            correction_to_instant: record.correction_to_instant,
        }
    }
}

impl Default for IdentityScheme {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
        }
    }
}
