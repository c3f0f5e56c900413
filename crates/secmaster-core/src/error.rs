use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A required argument was missing or malformed. Raised before any
    /// storage access.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// The row being modified is no longer the open row on its axis.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend rejected a write against the schema (constraint violation,
    /// missing table or column).
    #[error("schema error: {0}")]
    Schema(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns `true` when the backend reported lock contention and the whole
    /// operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(err) => matches!(
                err.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Classifies a failed write: constraint violations and statements the
    /// schema cannot satisfy become [`Error::Schema`], everything else stays a
    /// storage error.
    pub(crate) fn from_write(err: rusqlite::Error) -> Self {
        let message = err.to_string();
        match err.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => Self::Schema(message),
            Some(ErrorCode::Unknown)
                if message.contains("no such table") || message.contains("no such column") =>
            {
                Self::Schema(message)
            }
            _ => Self::Storage(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
