use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ObjectId, Security, UniqueId};

/// A security as returned to callers: the payload plus its position on both
/// time axes, addressed by a fully versioned [`UniqueId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityDocument {
    pub unique_id: UniqueId,
    pub security: Security,
    pub version_from_instant: DateTime<Utc>,
    pub version_to_instant: Option<DateTime<Utc>>,
    pub correction_from_instant: DateTime<Utc>,
    pub correction_to_instant: Option<DateTime<Utc>>,
}

impl SecurityDocument {
    #[must_use]
    pub const fn object_id(&self) -> &ObjectId {
        self.unique_id.object_id()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.security.name
    }

    #[must_use]
    pub const fn is_latest_version(&self) -> bool {
        self.version_to_instant.is_none()
    }

    #[must_use]
    pub const fn is_latest_correction(&self) -> bool {
        self.correction_to_instant.is_none()
    }
}
