//! Update engine for externally distributed platform bundles.
//!
//! A host application that depends on an external executable (a "bundle")
//! uses this crate to find the newest published release, download it, and
//! install it over the current copy without ever leaving a half-replaced
//! installation behind.
//!
//! # Overview
//!
//! - [`version`]: total ordering over version strings
//! - [`metadata`]: the release description shared by server and disk
//! - [`location`]: where the installed and published bundles live
//! - [`install`]: archive extraction and the crash-safe directory swap
//! - [`coordinator`]: single-flight orchestration with lifecycle events
//!
//! # Server layout
//!
//! ```text
//! <base_url>/<platform>/<arch>/meta.json
//! <base_url>/<platform>/<arch>/<pluginVersion>/<dist>
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bundle_updater::{
//!     HostPlatform, HttpTransport, LocalBundle, NoopListener, RemoteBundle,
//!     UpdateCoordinator, UpdateDecision,
//! };
//!
//! fn update() -> bundle_updater::Result<()> {
//!     let platform = Arc::new(HostPlatform);
//!     let local = LocalBundle::new("/opt/tools", "tool", "Tool", platform.as_ref());
//!     let remote = RemoteBundle::new("https://example.com/tool/", "Tool", platform.as_ref())?;
//!     let coordinator = UpdateCoordinator::new(
//!         local,
//!         remote,
//!         platform,
//!         Arc::new(HttpTransport::new()?),
//!         Arc::new(NoopListener),
//!     );
//!
//!     if let UpdateDecision::UpdateAvailable(release) = coordinator.check_for_update()? {
//!         let outcome = coordinator.perform_update(&release)?;
//!         println!("{}", outcome.message("Tool"));
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod error;
pub mod metadata;
pub mod platform;
pub mod version;

// Locations and installation
pub mod install;
pub mod location;

// Orchestration
pub mod busy;
pub mod coordinator;
pub mod download;
pub mod events;

mod fs_ops;

// Re-export main types for convenience
pub use config::UpdaterConfig;
pub use coordinator::{UpdateCoordinator, UpdateDecision};
pub use download::{
    CancelToken, DownloadProgress, HttpTransport, Transport, format_bytes, format_speed,
};
pub use error::{FailureKind, Phase, Result, UpdateError};
pub use events::{ChannelListener, InstallOutcome, NoopListener, UpdateEvent, UpdateListener};
pub use install::{ArchiveInstaller, ArchiveType, RecoveryAction, recover};
pub use location::{BundleLocation, LocalBundle, RemoteBundle};
pub use metadata::BundleMetadata;
pub use platform::{FixedPlatform, HostPlatform, Platform, PlatformInfo};
pub use version::{Version, compare, find_closest_version, sort_versions};

/// Current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert!(!VERSION.is_empty());
    }
}
