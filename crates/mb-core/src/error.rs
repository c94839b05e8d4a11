//! Unified error type for the mediabox application.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].
//!
//! Validation failures ([`Error::PathTraversal`], [`Error::UnsupportedCodec`],
//! [`Error::InvalidSegment`]) are raised before any subprocess is spawned.
//! [`Error::StreamAbort`] and [`Error::SocketReset`] describe the client going
//! away and are never application faults.

use std::fmt;
use std::path::Path;

/// Unified error type covering all failure modes in mediabox.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested path escapes its configured library root.
    #[error("Path traversal rejected: {path}")]
    PathTraversal {
        /// The offending relative path as supplied by the client.
        path: String,
    },

    /// No hardware decoder is mapped for the source's video codec.
    #[error("Unsupported codec: {}", .codec.as_deref().unwrap_or("no video stream"))]
    UnsupportedCodec {
        /// The probed codec name, or `None` when no video stream exists.
        codec: Option<String>,
    },

    /// A segment request has a non-positive duration or an invalid start.
    #[error("Invalid segment: {0}")]
    InvalidSegment(String),

    /// The metadata-inspection tool failed or produced unparsable output.
    #[error("Probe failed for {path}: {message}")]
    ProbeFailure {
        /// The file that was being probed.
        path: String,
        /// Human-readable error description.
        message: String,
    },

    /// The transcoder (or another tool) could not be started.
    #[error("Failed to spawn {tool}: {message}")]
    ProcessSpawnFailure {
        /// Name of the program that failed to start.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The client disconnected before the response finished.
    #[error("Stream aborted by client")]
    StreamAbort,

    /// The client's socket was reset, typically while seeking rapidly.
    #[error("Socket reset by peer")]
    SocketReset,

    /// A file could not be stat'ed.
    #[error("File not found: {path}")]
    FileNotFound {
        /// The absolute path that was looked up.
        path: String,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "base path").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::PathTraversal { .. } => 403,
            Error::UnsupportedCodec { .. } => 415,
            Error::InvalidSegment(_) => 400,
            Error::ProbeFailure { .. } => 422,
            Error::ProcessSpawnFailure { .. } => 502,
            // Nginx-style "client closed request"; nobody is left to read it.
            Error::StreamAbort => 499,
            Error::SocketReset => 499,
            Error::FileNotFound { .. } => 404,
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::PathTraversal { .. } => "path_traversal",
            Error::UnsupportedCodec { .. } => "unsupported_codec",
            Error::InvalidSegment(_) => "invalid_segment",
            Error::ProbeFailure { .. } => "probe_failure",
            Error::ProcessSpawnFailure { .. } => "process_spawn_failure",
            Error::StreamAbort => "stream_abort",
            Error::SocketReset => "socket_reset",
            Error::FileNotFound { .. } => "file_not_found",
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether this error describes the client going away rather than a fault.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::StreamAbort | Error::SocketReset)
    }

    /// Classify an I/O error raised while talking to a client.
    ///
    /// Resets and broken pipes become [`Error::SocketReset`], aborted
    /// connections and unexpected EOFs become [`Error::StreamAbort`], and
    /// anything else stays an [`Error::Io`].
    pub fn from_transport(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => Error::SocketReset,
            ErrorKind::ConnectionAborted | ErrorKind::UnexpectedEof => Error::StreamAbort,
            _ => Error::Io { source: err },
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::FileNotFound`].
    pub fn file_not_found(path: &Path) -> Self {
        Error::FileNotFound {
            path: path.display().to_string(),
        }
    }

    /// Convenience constructor for [`Error::PathTraversal`].
    pub fn path_traversal(path: impl Into<String>) -> Self {
        Error::PathTraversal { path: path.into() }
    }

    /// Convenience constructor for [`Error::ProbeFailure`].
    pub fn probe(path: &Path, message: impl Into<String>) -> Self {
        Error::ProbeFailure {
            path: path.display().to_string(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::ProcessSpawnFailure`].
    pub fn spawn(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ProcessSpawnFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
