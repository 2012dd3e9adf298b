//! Unified error type for the pixforge service.
//!
//! Every failure in a conversion request funnels into [`Error`], which carries
//! enough context for the HTTP layer to derive a status code via
//! [`Error::http_status`].

use std::time::Duration;

/// Unified error type covering all failure modes in pixforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The uploaded file or its metadata was rejected.
    #[error("{0}")]
    Validation(String),

    /// A path parameter fell outside its enumeration or range.
    #[error("{0}")]
    InvalidParameter(String),

    /// An optional external dependency is required but not installed.
    #[error("{message}")]
    DependencyUnavailable {
        /// Name of the missing dependency (e.g. "heif-enc").
        dependency: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool ran but did not produce a usable result.
    #[error("{tool} failed: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool ran past its wall-clock limit and was killed.
    #[error("Conversion timed out after {} seconds.", after.as_secs())]
    Timeout {
        /// Name of the tool that was killed.
        tool: String,
        /// The deadline that expired.
        after: Duration,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::InvalidParameter(_) => 422,
            Error::DependencyUnavailable { .. } => 503,
            Error::Tool { .. } => 500,
            Error::Timeout { .. } => 504,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Whether the message may contain host details (paths, OS errors) that
    /// must not be shown to the caller.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Io { .. } | Error::Internal(_))
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::DependencyUnavailable`].
    pub fn dependency_unavailable(
        dependency: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::DependencyUnavailable {
            dependency: dependency.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
