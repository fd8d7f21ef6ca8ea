//! Unified error types for the `appwrite-client` crate.
//!
//! This module centralizes all failures that can occur while using the SDK and
//! provides a single top-level [`Error`] enum plus the convenient [`Result`] alias.
//! Errors from lower layers (`reqwest`, `tungstenite`, URL parsing, file I/O) are
//! mapped into structured variants so callers can handle them precisely.

use thiserror::Error;

// --- Build-Time Error ---

/// Errors that can occur while building a [`crate::Client`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to build the HTTP client (reqwest configuration).
    #[error("Failed to build the HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    /// The configured endpoint is not a usable HTTP(S) URL.
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),
}

// --- The Main Operational Error Enum ---

/// The crate's top-level error type.
///
/// It groups failures into high-level categories:
/// - [`Error::Request`] — HTTP transport/server/decoding issues
/// - [`Error::Upload`] — chunked upload issues
/// - [`Error::Realtime`] — WebSocket connection and protocol issues
/// - [`Error::Parse`] — URL parsing failures
/// - [`Error::Build`] — construction of the client failed
///
/// Most lower-level errors automatically convert into this enum via `From`.
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request/response failed (transport, server, validation, JSON).
    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    /// Chunked upload failed.
    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    /// Realtime connection or protocol failure.
    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    /// URL parsing failed while preparing a request or endpoint.
    #[error("Failed to parse URL: {0}")]
    Parse(#[from] url::ParseError),

    /// Building the client failed (reqwest or endpoint configuration).
    #[error("Client build failed: {0}")]
    Build(#[from] BuildError),
}

// --- Consolidated Request Error ---

/// Transport and server-side HTTP errors.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Network/protocol failure from reqwest (timeouts, TLS, I/O, etc.).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server returned a non-success status.
    ///
    /// `error_type` and `message` are filled from the machine-readable error
    /// object when the body parses as one; `response` always carries the raw
    /// body text so nothing is lost.
    #[error("Server responded with an error: {status} - {message}")]
    Server {
        /// The HTTP status code returned by the server.
        status: reqwest::StatusCode,
        /// Machine-readable error type reported by the server, if any.
        error_type: Option<String>,
        /// Short description extracted from the server response.
        message: String,
        /// The raw response body.
        response: String,
    },

    /// The server returned a success status but the body did not match the
    /// expected shape. The original status and raw body are preserved.
    #[error("Failed to decode response ({status}): {message}")]
    Decode {
        /// The (successful) HTTP status code of the response that failed to decode.
        status: reqwest::StatusCode,
        /// Error message from the JSON deserializer.
        message: String,
        /// The raw response body.
        response: String,
    },

    /// Caller supplied an invalid URL/path/argument for this API.
    #[error("Invalid request: {message}")]
    Validation {
        /// Human-readable explanation of what was invalid.
        message: String,
    },
}

// --- Chunked Upload Errors ---

/// Errors specific to the chunked upload engine.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Reading from the input source failed.
    #[error("Failed to read upload input: {0}")]
    Io(#[from] std::io::Error),

    /// A chunk response did not carry the `$id` needed to address the
    /// in-progress upload.
    #[error("Chunk response is missing the file id")]
    MissingFileId,

    /// The preliminary resume lookup returned an unusable response.
    #[error("Cannot resume upload: {message}")]
    Resume {
        /// What was wrong with the resume lookup response.
        message: String,
    },
}

// --- Realtime Errors ---

/// Errors originating from the realtime WebSocket connection.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Establishing the WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// The connection URL could not be built from the client configuration.
    #[error("Cannot build realtime URL: {message}")]
    Url {
        /// What was missing or invalid.
        message: String,
    },

    /// The server pushed an explicit error frame.
    #[error("Server pushed an error: {message}")]
    Server {
        /// Numeric error code reported by the server, if any.
        code: Option<i64>,
        /// Machine-readable error type reported by the server, if any.
        error_type: Option<String>,
        /// Human-readable error message.
        message: String,
    },

    /// A frame could not be parsed as the expected tagged union.
    #[error("Malformed realtime frame: {message}")]
    Protocol {
        /// What was wrong with the frame.
        message: String,
    },
}

/// A specialized `Result` type for `appwrite-client` operations.
pub type Result<T> = std::result::Result<T, Error>;

// Ergonomic "Staircase" From Implementations ---
// A macro to reduce boilerplate for converting base errors into the top-level Error.
macro_rules! impl_from_for_error {
    ($from_type:ty, $to_variant:path) => {
        impl From<$from_type> for Error {
            fn from(err: $from_type) -> Self {
                $to_variant(err.into())
            }
        }
    };
}

// Request Errors
impl_from_for_error!(reqwest::Error, Error::Request);

// Upload Errors
impl_from_for_error!(std::io::Error, Error::Upload);

// Realtime Errors
impl_from_for_error!(tokio_tungstenite::tungstenite::Error, Error::Realtime);
