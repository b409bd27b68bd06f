//! Error types for skygen
//!
//! This module provides the error taxonomy for the library:
//! - Domain-specific error types (Transport, Cache, Export)
//! - Terminal remote-job failures carried as data, not control flow
//! - Retryability classification for the orchestrators' retry policy

use std::path::PathBuf;
use thiserror::Error;

use crate::types::JobId;

/// Result type alias for skygen operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for skygen
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "api.base_url")
        key: Option<String>,
    },

    /// Transport-level error (connection, non-2xx status, malformed response)
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Artifact cache error
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Export materialization error (archive unpack, face decode, missing URL)
    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// Remote job reached the `Error` terminal status
    #[error("job {id} failed: {message}")]
    JobFailed {
        /// The job that failed remotely
        id: JobId,
        /// Server-supplied failure message
        message: String,
    },

    /// Operation was cancelled before reaching a terminal state
    #[error("operation cancelled")]
    Cancelled,

    /// Generation handle not found (already awaited or never submitted)
    #[error("unknown generation handle: {0}")]
    UnknownHandle(u64),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Transport-level errors
///
/// Produced by the [`Transport`](crate::transport::Transport) for a single
/// attempt. The transport never retries internally; retry policy lives in
/// the orchestrators.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to build the underlying HTTP client
    #[error("failed to build HTTP client: {0}")]
    BuildClient(String),

    /// Connection-level failure (DNS, connect, timeout, TLS)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The service answered with a non-2xx status code
    #[error("HTTP {code} from {url}: {body}")]
    Status {
        /// HTTP status code returned by the service
        code: u16,
        /// The request URL
        url: String,
        /// Response body text (truncated for logging)
        body: String,
    },

    /// The request or base URL could not be parsed
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Why it could not be parsed
        reason: String,
    },

    /// The response body could not be decoded into the expected shape
    #[error("malformed response from {url}: {reason}")]
    MalformedResponse {
        /// The request URL
        url: String,
        /// Decode failure description
        reason: String,
    },

    /// Push-channel transport failure (connect, subscribe, frame decode)
    #[error("push channel error: {0}")]
    Push(String),
}

/// Artifact cache errors
///
/// Cache failures degrade the affected artifact to "not cached" at the call
/// site; they never corrupt the cache directory.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to create the cache directory
    #[error("failed to create cache directory {path}: {reason}")]
    CreateDir {
        /// The directory that could not be created
        path: PathBuf,
        /// OS-level failure description
        reason: String,
    },

    /// Failed to write a cache entry
    #[error("failed to write cache entry {path}: {reason}")]
    WriteFailed {
        /// The destination path of the entry
        path: PathBuf,
        /// OS-level failure description
        reason: String,
    },

    /// The remote URL could not be reduced to a cache key
    #[error("cannot derive cache key from URL: {0}")]
    InvalidKey(String),
}

/// Export materialization errors
#[derive(Debug, Error)]
pub enum ExportError {
    /// The export job completed without a downloadable artifact URL
    #[error("export job {id} completed without a file URL")]
    MissingFileUrl {
        /// The export job missing its artifact URL
        id: JobId,
    },

    /// The cube-face archive could not be opened or read
    #[error("failed to unpack archive {archive}: {reason}")]
    ArchiveUnpack {
        /// Path to the cached archive
        archive: PathBuf,
        /// Unpack failure description
        reason: String,
    },

    /// One face image inside the archive could not be decoded
    #[error("failed to decode cube face {face}: {reason}")]
    FaceDecode {
        /// The archive entry name of the face
        face: String,
        /// Decode failure description
        reason: String,
    },

    /// The archive is missing a required face
    #[error("archive {archive} is missing cube face {face}")]
    MissingFace {
        /// Path to the cached archive
        archive: PathBuf,
        /// Name of the missing face slot
        face: &'static str,
    },
}
