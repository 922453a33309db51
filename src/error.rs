//! Error types for a chat turn.

use thiserror::Error;

/// Everything that can go wrong between receiving a question and handing
/// annotated text back to the UI.
#[derive(Debug, Error)]
pub enum ChatError {
    /// HTTP request to the knowledge base endpoint failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with an error status or an exception frame.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code (0 for in-stream exceptions).
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// The event stream could not be framed (length, CRC, headers).
    #[error("Stream error: {0}")]
    Stream(String),

    /// An event payload did not match the expected schema.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Request signing failed.
    #[error("Signing error: {0}")]
    Signing(String),

    /// The stream was not drained before the deadline.
    #[error("Stream did not complete within {0:?}")]
    Deadline(std::time::Duration),

    /// Caller-side input was rejected before any network call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A citation span points outside the assembled text.
    #[error("Citation span end {end} is out of range for text of length {len}")]
    InvalidSpan {
        /// Offending end offset.
        end: usize,
        /// Length of the assembled text in chars.
        len: usize,
    },

    /// Configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result alias for chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;
