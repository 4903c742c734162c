//! Core types for rustsmq
//!
//! This crate provides the error codes and request identifiers shared by the
//! queue engine and the HTTP server.

pub mod error;
pub mod request_id;

pub use error::{ApiError, ErrorCode};
pub use request_id::RequestId;
