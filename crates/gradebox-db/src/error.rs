//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for gradebox_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => gradebox_core::Error::NotFound(what),
            DbError::Duplicate(what) => gradebox_core::Error::Conflict(what),
            DbError::InvalidInput(what) => gradebox_core::Error::InvalidInput(what),
            DbError::InvalidData(what) => gradebox_core::Error::Internal(what),
            other => gradebox_core::Error::Database(other.to_string()),
        }
    }
}
