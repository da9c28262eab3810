//! Error types for the bundle update engine.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The stage of an update operation an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Downloading or parsing the remote metadata document.
    MetadataFetch,
    /// Downloading the distribution archive.
    ArtifactFetch,
    /// Unpacking the archive into the staging or destination directory.
    Extraction,
    /// Moving directories during the swap-install protocol.
    Swap,
    /// Repairing a swap interrupted by a previous run.
    Recovery,
    /// Reading or writing local metadata and configuration.
    Local,
}

impl Phase {
    /// Get a human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MetadataFetch => "metadata fetch",
            Self::ArtifactFetch => "artifact fetch",
            Self::Extraction => "extraction",
            Self::Swap => "swap",
            Self::Recovery => "recovery",
            Self::Local => "local state",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Coarse classification of a failure, reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Metadata or artifact fetch failed.
    Network,
    /// Metadata document was malformed.
    Parse,
    /// Metadata was well-formed but missing required fields.
    InvalidMetadata,
    /// Extraction or swap failed.
    Install,
    /// The operation could not start (busy, unsupported platform, bad config).
    Rejected,
    /// The operation was canceled.
    Canceled,
}

/// Errors that can occur during the update process.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpdateError {
    /// Network request failed.
    #[error("network error during {phase} ({url}): {message}")]
    Network {
        /// Phase the request belonged to.
        phase: Phase,
        /// Requested URL.
        url: String,
        /// Transport error description.
        message: String,
    },

    /// A metadata document could not be parsed.
    #[error("failed to parse metadata from {origin}")]
    Parse {
        /// URL or path the document came from.
        origin: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Metadata parsed but is missing its version or distribution reference.
    #[error("invalid bundle metadata: {0}")]
    InvalidMetadata(String),

    /// Filesystem operation failed.
    #[error("failed to {operation} {path} during {phase}")]
    Filesystem {
        /// Phase the operation belonged to.
        phase: Phase,
        /// Short verb describing the operation ("create directory", "move", ...).
        operation: &'static str,
        /// Path the operation acted on.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The archive could not be read.
    #[error("archive extraction error: {0}")]
    Archive(String),

    /// An archive entry would be written outside the destination directory.
    #[error("archive entry escapes destination: {entry}")]
    UnsafeArchiveEntry {
        /// Entry name as stored in the archive.
        entry: String,
    },

    /// The operation was canceled before the install phase started.
    #[error("operation canceled")]
    Canceled,

    /// Another update operation is already in progress.
    #[error("another update operation is already in progress")]
    Busy,

    /// Bundles are not published for this platform.
    #[error("platform is not supported: {0}")]
    UnsupportedPlatform(String),

    /// The remote base URL could not be parsed or resolved.
    #[error("invalid base URL {url}: {message}")]
    InvalidBaseUrl {
        /// The offending URL.
        url: String,
        /// Parser error description.
        message: String,
    },
}

impl UpdateError {
    /// Wrap an I/O error with phase, operation and path context.
    pub fn fs(
        phase: Phase,
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Filesystem {
            phase,
            operation,
            path: path.into(),
            source,
        }
    }

    /// Returns the phase this error belongs to, when known.
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Network { phase, .. } | Self::Filesystem { phase, .. } => Some(*phase),
            Self::Parse { .. } | Self::InvalidMetadata(_) => Some(Phase::MetadataFetch),
            Self::Archive(_) | Self::UnsafeArchiveEntry { .. } => Some(Phase::Extraction),
            Self::Canceled | Self::Busy | Self::UnsupportedPlatform(_) => None,
            Self::InvalidBaseUrl { .. } => Some(Phase::MetadataFetch),
        }
    }

    /// Classify this error for listeners.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } => FailureKind::Network,
            Self::Parse { .. } => FailureKind::Parse,
            Self::InvalidMetadata(_) => FailureKind::InvalidMetadata,
            Self::Filesystem { .. } | Self::Archive(_) | Self::UnsafeArchiveEntry { .. } => {
                FailureKind::Install
            }
            Self::Canceled => FailureKind::Canceled,
            Self::Busy | Self::UnsupportedPlatform(_) | Self::InvalidBaseUrl { .. } => {
                FailureKind::Rejected
            }
        }
    }

    /// Returns a user-friendly error message suitable for display in the UI.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::Network { .. } => {
                "Could not download the bundle. Please check your internet connection."
            }
            Self::Parse { .. } => "The bundle server returned an unreadable release description.",
            Self::InvalidMetadata(_) => "No bundle release is available.",
            Self::Filesystem { .. } => "Could not install the bundle. Please check disk space and permissions.",
            Self::Archive(_) | Self::UnsafeArchiveEntry { .. } => {
                "Could not extract the bundle package."
            }
            Self::Canceled => "The download was canceled.",
            Self::Busy => "An update is already in progress.",
            Self::UnsupportedPlatform(_) => "This platform is not supported!",
            Self::InvalidBaseUrl { .. } => "The bundle server address is misconfigured.",
        }
    }

    /// Returns whether this error is potentially recoverable with a retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Busy)
    }

    /// Returns whether this error is a cancellation rather than a failure.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<zip::result::ZipError> for UpdateError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// Result type alias for update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;
