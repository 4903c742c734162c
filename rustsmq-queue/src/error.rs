//! Engine error taxonomy

use rustsmq_core::ErrorCode;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors returned by queue operations
///
/// Validation failures are always reported before anything is written.
/// Backend failures are surfaced as-is; the engine never retries.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue '{0}' does not exist.")]
    QueueNotFound(String),

    #[error("Queue '{0}' already exists.")]
    AlreadyExists(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("The maximum message length in bytes is {max}, got {size}.")]
    PayloadTooLarge { size: usize, max: u32 },

    #[error("Message with ID '{0}' does not exist.")]
    MessageNotFound(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// Wire error code for this failure
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::QueueNotFound(_) => ErrorCode::QueueNotFound,
            Self::AlreadyExists(_) => ErrorCode::QueueExists,
            Self::InvalidParameter(_) => ErrorCode::InvalidParameter,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::MessageNotFound(_) => ErrorCode::MessageNotFound,
            Self::BackendUnavailable(_) => ErrorCode::BackendUnavailable,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParameter(message.into())
    }
}

impl From<StorageError> for QueueError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::QueueNotFound(name) => Self::QueueNotFound(name),
            StorageError::PayloadTooLarge { size, max } => Self::PayloadTooLarge { size, max },
            StorageError::Unavailable(msg) | StorageError::Configuration(msg) => {
                Self::BackendUnavailable(msg)
            }
            StorageError::Internal(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_taxonomy() {
        let err: QueueError = StorageError::QueueNotFound("jobs".into()).into();
        assert!(matches!(err, QueueError::QueueNotFound(ref name) if name == "jobs"));

        let err: QueueError = StorageError::Unavailable("connection refused".into()).into();
        assert_eq!(err.code(), ErrorCode::BackendUnavailable);

        let err: QueueError = StorageError::Internal("already leased".into()).into();
        assert_eq!(err.code(), ErrorCode::InternalError);

        let err: QueueError = StorageError::PayloadTooLarge { size: 9, max: 8 }.into();
        assert!(matches!(err, QueueError::PayloadTooLarge { size: 9, max: 8 }));
    }

    #[test]
    fn test_payload_too_large_message() {
        let err = QueueError::PayloadTooLarge {
            size: 2048,
            max: 1024,
        };
        assert_eq!(
            err.to_string(),
            "The maximum message length in bytes is 1024, got 2048."
        );
        assert_eq!(err.code(), ErrorCode::PayloadTooLarge);
    }
}
