/// Low-level store-adapter errors (backend I/O, serialization).
/// This is the error type for the `Store` trait — adapter operations can only
/// fail with infrastructure errors, never domain errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Application-level errors for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum MqError {
    #[error("queue name must not be blank")]
    BlankQueueName,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type Result<T> = std::result::Result<T, MqError>;
