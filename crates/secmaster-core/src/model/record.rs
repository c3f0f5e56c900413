use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Security;

/// One row of the bitemporal history as the store sees it.
///
/// The row is mutable only while open on both axes; once a terminal instant
/// is written it is never written again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub object_id: i64,
    pub version_number: u32,
    pub correction_number: u32,
    pub payload: Security,

    /// Start of the business-validity interval.
    pub version_from_instant: DateTime<Utc>,
    /// End of the business-validity interval, `None` while this is the
    /// latest version.
    pub version_to_instant: Option<DateTime<Utc>>,

    /// When the system learned this row.
    pub correction_from_instant: DateTime<Utc>,
    /// When the row was superseded by a correction, `None` while it is the
    /// authoritative correction of its version.
    pub correction_to_instant: Option<DateTime<Utc>>,
}

impl VersionedRecord {
    /// A row open on both axes from `now`.
    #[must_use]
    pub fn open(
        object_id: i64,
        version_number: u32,
        correction_number: u32,
        payload: Security,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            object_id,
            version_number,
            correction_number,
            payload,
            version_from_instant: now,
            version_to_instant: None,
            correction_from_instant: now,
            correction_to_instant: None,
        }
    }

    #[must_use]
    pub const fn is_latest_version(&self) -> bool {
        self.version_to_instant.is_none()
    }

    #[must_use]
    pub const fn is_latest_correction(&self) -> bool {
        self.correction_to_instant.is_none()
    }

    /// Half-open containment on the version axis: `[from, to)`.
    #[must_use]
    pub fn version_contains(&self, instant: DateTime<Utc>) -> bool {
        self.version_from_instant <= instant && self.version_to_instant.map_or(true, |to| instant < to)
    }

    /// Half-open containment on the correction axis: `[from, to)`.
    #[must_use]
    pub fn correction_contains(&self, instant: DateTime<Utc>) -> bool {
        self.correction_from_instant <= instant
            && self.correction_to_instant.map_or(true, |to| instant < to)
    }
}
