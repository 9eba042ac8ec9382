//! Error types for the storage layer.

/// Errors a store or pub/sub backend can report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend can't be reached (connection refused, closed, etc.).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed the operation.
    #[error("store operation failed: {0}")]
    Backend(String),
}
