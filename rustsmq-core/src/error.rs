//! Error codes and wire formatting

use serde::Serialize;
use thiserror::Error;

/// Error codes surfaced on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Queue management
    QueueNotFound,
    QueueExists,

    // Messages
    MessageNotFound,
    PayloadTooLarge,

    // Request validation
    InvalidParameter,
    MissingParameter,
    MalformedRequest,
    UnknownOperation,

    // Backend
    BackendUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueueNotFound => "QueueNotFound",
            Self::QueueExists => "QueueExists",
            Self::MessageNotFound => "MessageNotFound",
            Self::PayloadTooLarge => "PayloadTooLarge",
            Self::InvalidParameter => "InvalidParameter",
            Self::MissingParameter => "MissingParameter",
            Self::MalformedRequest => "MalformedRequest",
            Self::UnknownOperation => "UnknownOperation",
            Self::BackendUnavailable => "BackendUnavailable",
            Self::InternalError => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::QueueNotFound
            | Self::QueueExists
            | Self::MessageNotFound
            | Self::PayloadTooLarge
            | Self::InvalidParameter
            | Self::MissingParameter
            | Self::MalformedRequest
            | Self::UnknownOperation => 400,
            Self::BackendUnavailable => 503,
            Self::InternalError => 500,
        }
    }
}

/// Error as rendered to API callers
#[derive(Debug, Error)]
#[error("{}: {}", .code.as_str(), .message)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Format as a JSON error body
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct JsonError<'a> {
            #[serde(rename = "__type")]
            error_type: &'a str,
            message: &'a str,
        }

        let error = JsonError {
            error_type: self.code.as_str(),
            message: &self.message,
        };

        serde_json::to_string(&error).unwrap_or_else(|_| {
            format!(
                r#"{{"__type":"{}","message":"{}"}}"#,
                self.code.as_str(),
                self.message
            )
        })
    }
}
