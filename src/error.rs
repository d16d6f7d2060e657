// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for gen-magic
//!
//! Submission-time failures are returned synchronously from the session
//! controller. Failures after a stream has started never travel through this
//! type to the caller; they end the stream and are reported as a
//! [`StreamEnd::Failed`](crate::llm::provider::StreamEnd) diagnostic instead.

use thiserror::Error;

/// Main error type for gen-magic operations
#[derive(Error, Debug)]
pub enum GenMagicError {
    /// The model definition names an API no adapter handles
    #[error("unknown API \"{0}\"")]
    UnsupportedApi(String),

    /// Failure to open or maintain a provider stream
    #[error("Connection error: {0}")]
    Connection(String),

    /// A raster image could not be serialized to PNG
    #[error("Image encoding failed: {0}")]
    Encoding(String),

    /// An encoded image was not valid base64 or not a decodable image
    #[error("Image decoding failed: {0}")]
    Decoding(String),

    /// Input rejected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// A completion is already in flight for this session
    #[error("A completion is already in progress")]
    Busy,

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Project store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Provider API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// API-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// Result type alias for gen-magic operations
pub type Result<T> = std::result::Result<T, GenMagicError>;

impl From<rusqlite::Error> for GenMagicError {
    fn from(err: rusqlite::Error) -> Self {
        GenMagicError::Store(err.to_string())
    }
}

impl From<image::ImageError> for GenMagicError {
    fn from(err: image::ImageError) -> Self {
        GenMagicError::Decoding(err.to_string())
    }
}

impl From<base64::DecodeError> for GenMagicError {
    fn from(err: base64::DecodeError) -> Self {
        GenMagicError::Decoding(err.to_string())
    }
}
