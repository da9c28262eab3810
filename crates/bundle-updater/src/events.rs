//! Lifecycle notifications for the host application.

use std::sync::Mutex;
use std::sync::mpsc::Sender;

use crate::download::DownloadProgress;
use crate::error::{FailureKind, Phase, UpdateError};
use crate::metadata::BundleMetadata;

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    /// Installed version.
    pub version: String,
    /// True when nothing was installed before.
    pub first_install: bool,
}

impl InstallOutcome {
    /// Message for the user.
    #[must_use]
    pub fn message(&self, display_name: &str) -> String {
        if self.first_install {
            format!("{display_name} {} has been installed.", self.version)
        } else {
            format!("{display_name} has been updated to {}.", self.version)
        }
    }
}

/// Event emitted by the update coordinator.
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// An operation started (`true`) or finished (`false`).
    BusyChanged(bool),
    /// Human-readable description of the current step.
    Progress(String),
    /// Artifact download progress.
    Download(DownloadProgress),
    /// Remote metadata was fetched.
    MetadataFetched(BundleMetadata),
    /// A bundle was installed.
    Installed(InstallOutcome),
    /// The operation was canceled.
    Canceled,
    /// The operation failed.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// Phase the failure happened in, when known.
        phase: Option<Phase>,
        /// Description for the user.
        message: String,
    },
}

impl UpdateEvent {
    /// Event describing `error`: [`UpdateEvent::Canceled`] for cancellation,
    /// [`UpdateEvent::Failed`] otherwise.
    #[must_use]
    pub fn from_error(error: &UpdateError) -> Self {
        if error.is_canceled() {
            return Self::Canceled;
        }
        Self::Failed {
            kind: error.failure_kind(),
            phase: error.phase(),
            message: error.to_string(),
        }
    }
}

/// Receives coordinator events. Called on whichever thread runs the
/// operation.
pub trait UpdateListener: Send + Sync {
    /// Handle an event.
    fn on_event(&self, event: &UpdateEvent);
}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl UpdateListener for NoopListener {
    fn on_event(&self, _event: &UpdateEvent) {}
}

/// Listener forwarding events into a channel.
#[derive(Debug)]
pub struct ChannelListener {
    sender: Mutex<Sender<UpdateEvent>>,
}

impl ChannelListener {
    /// Forward events to `sender`.
    #[must_use]
    pub fn new(sender: Sender<UpdateEvent>) -> Self {
        Self {
            sender: Mutex::new(sender),
        }
    }
}

impl UpdateListener for ChannelListener {
    fn on_event(&self, event: &UpdateEvent) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // A dropped receiver just stops observing.
        let _ = sender.send(event.clone());
    }
}

impl<F> UpdateListener for F
where
    F: Fn(&UpdateEvent) + Send + Sync,
{
    fn on_event(&self, event: &UpdateEvent) {
        self(event);
    }
}
