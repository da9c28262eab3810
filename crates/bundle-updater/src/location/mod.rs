//! Where a bundle's files and metadata live.
//!
//! - [`LocalBundle`]: the installed copy on disk
//! - [`RemoteBundle`]: the published releases on a web server

mod local;
mod remote;

use std::sync::Arc;

use crate::metadata::BundleMetadata;

pub use local::LocalBundle;
pub use remote::{DEFAULT_ARCH, META_FILE_NAME, RemoteBundle, S3_DEFAULT_URL, s3_base_url_with};

/// Shared behavior of bundle locations.
pub trait BundleLocation {
    /// Name shown to users.
    fn display_name(&self) -> &str;

    /// Current metadata snapshot, if known.
    fn metadata(&self) -> Option<Arc<BundleMetadata>>;

    /// Version of the current metadata, `"N/A"` when unknown.
    fn version_label(&self) -> String {
        self.metadata()
            .map_or_else(|| "N/A".to_string(), |m| m.version_label().to_string())
    }
}
