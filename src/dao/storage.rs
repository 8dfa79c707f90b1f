use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by store backends regardless of what sits behind them.
///
/// The core only ever mutates rows it read moments earlier (reservations,
/// run stamps, the playback singleton), so the failure a backend actually
/// reports is the target row having vanished in between, e.g. an admin
/// deleting a schedule while its firing is in flight.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} `{key}` is gone")]
    RowGone { entity: &'static str, key: String },
}

impl StorageError {
    /// A mutation target that no longer exists.
    pub fn row_gone(entity: &'static str, key: impl std::fmt::Display) -> Self {
        StorageError::RowGone {
            entity,
            key: key.to_string(),
        }
    }
}
