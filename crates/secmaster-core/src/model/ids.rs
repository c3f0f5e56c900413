use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const SEPARATOR: char = '~';

fn check_part(part: &str, what: &str) -> Result<()> {
    if part.is_empty() {
        return Err(Error::InvalidArgument(format!("{what} must not be empty")));
    }
    if part.contains(SEPARATOR) {
        return Err(Error::InvalidArgument(format!(
            "{what} must not contain '{SEPARATOR}': {part}"
        )));
    }
    Ok(())
}

/// Names one logical security across its whole history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId {
    scheme: String,
    value: String,
}

impl ObjectId {
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let scheme = scheme.into();
        let value = value.into();
        check_part(&scheme, "scheme")?;
        check_part(&value, "object id value")?;
        Ok(Self { scheme, value })
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The unversioned unique id, meaning "latest version, latest correction".
    #[must_use]
    pub fn at_latest_version(&self) -> UniqueId {
        UniqueId {
            object_id: self.clone(),
            version: None,
            correction: None,
        }
    }

    /// The unique id of one version, latest correction.
    #[must_use]
    pub fn at_version(&self, version: u32) -> UniqueId {
        UniqueId {
            object_id: self.clone(),
            version: Some(version),
            correction: None,
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.scheme, self.value)
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id: UniqueId = s.parse()?;
        if id.is_versioned() {
            return Err(Error::InvalidArgument(format!(
                "object id must not carry a version: {s}"
            )));
        }
        Ok(id.object_id)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_string()
    }
}

/// Identifies one row of the bitemporal history, or the latest row of an
/// object when the version (and possibly the correction) is omitted.
///
/// Textual form: `{scheme}~{objectId}~{version}[-{correction}]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueId {
    object_id: ObjectId,
    version: Option<u32>,
    correction: Option<u32>,
}

impl UniqueId {
    /// A fully specified id of a single row.
    pub fn of(
        scheme: impl Into<String>,
        value: impl Into<String>,
        version: u32,
        correction: u32,
    ) -> Result<Self> {
        Ok(Self {
            object_id: ObjectId::of(scheme, value)?,
            version: Some(version),
            correction: Some(correction),
        })
    }

    #[must_use]
    pub const fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    #[must_use]
    pub const fn version(&self) -> Option<u32> {
        self.version
    }

    #[must_use]
    pub const fn correction(&self) -> Option<u32> {
        self.correction
    }

    #[must_use]
    pub const fn is_versioned(&self) -> bool {
        self.version.is_some()
    }

    #[must_use]
    pub const fn is_latest(&self) -> bool {
        self.version.is_none()
    }

    /// Drops version and correction, pointing at the latest row of the object.
    #[must_use]
    pub fn to_latest(&self) -> Self {
        self.object_id.at_latest_version()
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object_id)?;
        if let Some(version) = self.version {
            write!(f, "{SEPARATOR}{version}")?;
            if let Some(correction) = self.correction {
                write!(f, "-{correction}")?;
            }
        }
        Ok(())
    }
}

fn parse_number(s: &str, what: &str, whole: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid {what} in unique id: {whole}")))
}

impl FromStr for UniqueId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        let (scheme, value, version_part) = match parts.as_slice() {
            [scheme, value] => (*scheme, *value, None),
            [scheme, value, version] => (*scheme, *value, Some(*version)),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "unique id must have 2 or 3 '{SEPARATOR}' separated parts: {s}"
                )))
            }
        };
        let object_id = ObjectId::of(scheme, value)?;

        let (version, correction) = match version_part {
            None => (None, None),
            Some(part) => match part.split_once('-') {
                Some((ver, corr)) => (
                    Some(parse_number(ver, "version", s)?),
                    Some(parse_number(corr, "correction", s)?),
                ),
                None => (Some(parse_number(part, "version", s)?), None),
            },
        };

        Ok(Self {
            object_id,
            version,
            correction,
        })
    }
}

impl TryFrom<String> for UniqueId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<UniqueId> for String {
    fn from(id: UniqueId) -> Self {
        id.to_string()
    }
}

/// Locates one row per object on both time axes. `None` on either axis means
/// "latest", fixed to the current instant before querying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionCorrection {
    pub version_as_of: Option<DateTime<Utc>>,
    pub corrected_to: Option<DateTime<Utc>>,
}

impl VersionCorrection {
    pub const LATEST: Self = Self {
        version_as_of: None,
        corrected_to: None,
    };

    #[must_use]
    pub const fn of(version_as_of: DateTime<Utc>, corrected_to: DateTime<Utc>) -> Self {
        Self {
            version_as_of: Some(version_as_of),
            corrected_to: Some(corrected_to),
        }
    }

    #[must_use]
    pub const fn of_version_as_of(version_as_of: DateTime<Utc>) -> Self {
        Self {
            version_as_of: Some(version_as_of),
            corrected_to: None,
        }
    }

    #[must_use]
    pub const fn contains_latest(&self) -> bool {
        self.version_as_of.is_none() || self.corrected_to.is_none()
    }

    /// Replaces every "latest" axis with `now`.
    #[must_use]
    pub fn with_latest_fixed(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.version_as_of.unwrap_or(now),
            self.corrected_to.unwrap_or(now),
        )
    }
}
