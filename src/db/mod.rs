pub mod images;

use thiserror::Error;

/// Failures of the queue table operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("image {0} not found")]
    NotFound(i64),

    /// A completion was attempted on a row that is already terminal.
    #[error("image {0} is already completed")]
    AlreadyCompleted(i64),
}
