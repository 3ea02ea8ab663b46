//! Error types for the MangaHub server.

use mangahub_types::SessionError;
use std::path::PathBuf;

/// Main error type for server startup and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Map a storage fault onto the wire taxonomy. The cause is preserved for
/// the log; the wire reply stays generic.
impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::Database(sqlx::Error::RowNotFound) => SessionError::DbNotFound,
            StorageError::Database(sqlx::Error::Database(db)) => match db.kind() {
                sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation => {
                    SessionError::DbConstraint(err.to_string())
                }
                _ => SessionError::DbQuery(err.to_string()),
            },
            StorageError::Database(sqlx::Error::PoolTimedOut)
            | StorageError::Database(sqlx::Error::PoolClosed) => {
                SessionError::DbConnection(err.to_string())
            }
            _ => SessionError::DbQuery(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_db_not_found() {
        let err = StorageError::Database(sqlx::Error::RowNotFound);
        let wire: SessionError = err.into();
        assert_eq!(wire.code(), "DB-004");
    }

    #[test]
    fn migration_error_maps_to_query_fault() {
        let err = StorageError::Migration("bad DDL".to_string());
        let wire: SessionError = err.into();
        assert_eq!(wire.code(), "DB-001");
    }
}
