//! Query requests and their paged results.

use chrono::{DateTime, Utc};
use secmaster_core::{
    ExternalId, IdentifierBundle, ObjectId, Paging, PagingRequest, SecurityDocument,
    VersionCorrection,
};
use serde::{Deserialize, Serialize};

/// Rows of one object overlapping a window on each time axis.
///
/// Unset bounds are unbounded. Equal `from` and `to` on an axis select the
/// rows valid at that instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub object_id: ObjectId,
    pub versions_from_instant: Option<DateTime<Utc>>,
    pub versions_to_instant: Option<DateTime<Utc>>,
    pub corrections_from_instant: Option<DateTime<Utc>>,
    pub corrections_to_instant: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paging: PagingRequest,
}

impl HistoryRequest {
    /// The whole history of `object_id`.
    #[must_use]
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            versions_from_instant: None,
            versions_to_instant: None,
            corrections_from_instant: None,
            corrections_to_instant: None,
            paging: PagingRequest::ALL,
        }
    }

    #[must_use]
    pub fn with_versions(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.versions_from_instant = from;
        self.versions_to_instant = to;
        self
    }

    #[must_use]
    pub fn with_corrections(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.corrections_from_instant = from;
        self.corrections_to_instant = to;
        self
    }

    #[must_use]
    pub fn with_paging(mut self, paging: PagingRequest) -> Self {
        self.paging = paging;
        self
    }
}

/// Newest version first, then newest correction first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResult {
    pub paging: Paging,
    pub documents: Vec<SecurityDocument>,
}

impl HistoryResult {
    #[must_use]
    pub fn first(&self) -> Option<&SecurityDocument> {
        self.documents.first()
    }
}

/// Criteria for a point-in-time search. Every unset criterion matches all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Restricts to these objects; an empty list matches nothing.
    pub object_ids: Option<Vec<ObjectId>>,
    /// Wildcard (`*`, `?`), case-insensitive.
    pub name: Option<String>,
    pub security_type: Option<String>,
    /// A row matches a bundle when it carries every identifier of the
    /// bundle, and matches the request when it matches any bundle.
    #[serde(default)]
    pub identifier_bundles: Vec<IdentifierBundle>,
    /// Wildcard match against the value of any identifier.
    pub external_id_value: Option<String>,
    #[serde(default)]
    pub version_correction: VersionCorrection,
    #[serde(default)]
    pub paging: PagingRequest,
}

impl SearchRequest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_object_id(mut self, object_id: ObjectId) -> Self {
        self.object_ids.get_or_insert_with(Vec::new).push(object_id);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_security_type(mut self, security_type: impl Into<String>) -> Self {
        self.security_type = Some(security_type.into());
        self
    }

    #[must_use]
    pub fn with_bundle(mut self, bundle: IdentifierBundle) -> Self {
        self.identifier_bundles.push(bundle);
        self
    }

    /// Shorthand for a single-identifier bundle.
    #[must_use]
    pub fn with_external_id(self, id: ExternalId) -> Self {
        self.with_bundle(IdentifierBundle::of([id]))
    }

    #[must_use]
    pub fn with_external_id_value(mut self, value: impl Into<String>) -> Self {
        self.external_id_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_version_correction(mut self, version_correction: VersionCorrection) -> Self {
        self.version_correction = version_correction;
        self
    }

    #[must_use]
    pub fn with_paging(mut self, paging: PagingRequest) -> Self {
        self.paging = paging;
        self
    }
}

/// One document per object, ordered by object id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub paging: Paging,
    pub documents: Vec<SecurityDocument>,
    /// The instants the search actually ran at.
    pub version_correction: VersionCorrection,
}

impl SearchResult {
    #[must_use]
    pub fn first(&self) -> Option<&SecurityDocument> {
        self.documents.first()
    }
}
