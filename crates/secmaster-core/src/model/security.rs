use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// An identifier issued by an external scheme (ticker, ISIN, CUSIP...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId {
    pub scheme: String,
    pub value: String,
}

impl ExternalId {
    #[must_use]
    pub fn of(scheme: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.scheme, self.value)
    }
}

/// A set of external identifiers that all refer to the same security.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IdentifierBundle(BTreeSet<ExternalId>);

impl IdentifierBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn of(ids: impl IntoIterator<Item = ExternalId>) -> Self {
        Self(ids.into_iter().collect())
    }

    #[must_use]
    pub fn with(mut self, id: ExternalId) -> Self {
        self.0.insert(id);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExternalId> {
        self.0.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &ExternalId) -> bool {
        self.0.contains(id)
    }
}

impl FromIterator<ExternalId> for IdentifierBundle {
    fn from_iter<T: IntoIterator<Item = ExternalId>>(iter: T) -> Self {
        Self::of(iter)
    }
}

/// The security snapshot stored in each row.
///
/// The store treats it as an opaque value with equality; only `name`,
/// `security_type` and `identifiers` are projected into columns for search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Security {
    pub name: String,
    pub security_type: String,
    #[serde(default)]
    pub identifiers: IdentifierBundle,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Security {
    #[must_use]
    pub fn new(name: impl Into<String>, security_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            security_type: security_type.into(),
            identifiers: IdentifierBundle::new(),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_identifier(mut self, id: ExternalId) -> Self {
        self.identifiers = self.identifiers.with(id);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
