//! SQL text used by the [`Store`](super::Store).
//!
//! The store never embeds statements directly; it asks its [`Dialect`] for
//! them. The provided methods target SQLite, so a backend variant (or a test
//! double that sabotages one statement) only overrides what differs.

use std::fmt;

/// Columns selected for every [`VersionedRecord`](crate::model::VersionedRecord),
/// in the order the row mapper expects.
pub const DOCUMENT_COLUMNS: &str = "d.doc_oid, d.ver_num, d.corr_num, \
     d.ver_from_instant, d.ver_to_instant, d.corr_from_instant, d.corr_to_instant, d.payload";

pub trait Dialect: fmt::Debug + Send + Sync {
    fn name(&self) -> &str {
        "sqlite"
    }

    /// `?1` = creation instant.
    fn insert_object(&self) -> &str {
        "INSERT INTO sec_object (created_instant) VALUES (?1)"
    }

    fn insert_document(&self) -> &str {
        "INSERT INTO sec_document (
            doc_oid, ver_num, corr_num,
            ver_from_instant, ver_to_instant, corr_from_instant, corr_to_instant,
            name, name_key, sec_type, payload
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
    }

    fn insert_idkey(&self) -> &str {
        "INSERT INTO sec_idkey (doc_oid, ver_num, corr_num, key_scheme, key_value, key_value_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    }

    /// `?1` = object. NULL when the object has no rows.
    fn max_version_number(&self) -> &str {
        "SELECT MAX(ver_num) FROM sec_document WHERE doc_oid = ?1"
    }

    /// `?1` = object, `?2` = instant. Touches only the current row.
    fn close_version(&self) -> &str {
        "UPDATE sec_document SET ver_to_instant = ?2
         WHERE doc_oid = ?1 AND ver_to_instant IS NULL AND corr_to_instant IS NULL"
    }

    /// `?1` = object, `?2` = version, `?3` = instant.
    fn close_correction(&self) -> &str {
        "UPDATE sec_document SET corr_to_instant = ?3
         WHERE doc_oid = ?1 AND ver_num = ?2 AND corr_to_instant IS NULL"
    }

    fn select_documents(&self) -> &str {
        "SELECT d.doc_oid, d.ver_num, d.corr_num, \
         d.ver_from_instant, d.ver_to_instant, d.corr_from_instant, d.corr_to_instant, d.payload \
         FROM sec_document d"
    }

    fn count_documents(&self) -> &str {
        "SELECT COUNT(*) FROM sec_document d"
    }

    /// Appended to paged queries; binds `:paging_fetch` and `:paging_offset`.
    fn paging(&self) -> &str {
        "LIMIT :paging_fetch OFFSET :paging_offset"
    }

    /// Wildcard match of `column` against the bound parameter, which holds
    /// the output of [`wildcard_to_like`]. Both sides are already folded
    /// with [`fold_case`].
    fn like(&self, column: &str, param: &str) -> String {
        format!("{column} LIKE {param} ESCAPE '\\'")
    }

    /// Restricts the row aliased `d` to those carrying an identifier.
    fn has_idkey(&self, scheme_param: &str, value_param: &str) -> String {
        format!(
            "EXISTS (SELECT 1 FROM sec_idkey k \
             WHERE k.doc_oid = d.doc_oid AND k.ver_num = d.ver_num AND k.corr_num = d.corr_num \
             AND k.key_scheme = {scheme_param} AND k.key_value = {value_param})"
        )
    }

    /// Restricts the row aliased `d` to those with any identifier value
    /// matching a wildcard.
    fn has_idkey_value_like(&self, value_param: &str) -> String {
        format!(
            "EXISTS (SELECT 1 FROM sec_idkey k \
             WHERE k.doc_oid = d.doc_oid AND k.ver_num = d.ver_num AND k.corr_num = d.corr_num \
             AND {})",
            self.like("k.key_value_key", value_param)
        )
    }
}

/// The stock SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {}

/// Search key of a name or identifier value. SQLite only folds ASCII, so
/// text is folded here before it is stored or bound.
#[must_use]
pub fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// Converts a `*`/`?` wildcard into a `LIKE` pattern escaped with `\`.
#[must_use]
pub fn wildcard_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 4);
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}
