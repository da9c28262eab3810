//! The installed bundle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::BundleLocation;
use crate::metadata::{BundleMetadata, METADATA_FILE_NAME};
use crate::platform::PlatformInfo;

/// A bundle installed under `<root>/<name>-pkg`.
#[derive(Debug, Clone)]
pub struct LocalBundle {
    root: PathBuf,
    name: String,
    display_name: String,
    exe_suffix: &'static str,
    metadata: Option<Arc<BundleMetadata>>,
}

impl LocalBundle {
    /// Describe the bundle `name` under `root`. Metadata is not loaded until
    /// [`reload_metadata`](Self::reload_metadata) is called.
    pub fn new(
        root: impl Into<PathBuf>,
        name: impl Into<String>,
        display_name: impl Into<String>,
        platform: &dyn PlatformInfo,
    ) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
            display_name: display_name.into(),
            exe_suffix: platform.platform().exe_suffix(),
            metadata: None,
        }
    }

    /// Root directory the bundle is installed under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bundle name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install directory: `<root>/<name>-pkg`.
    #[must_use]
    pub fn install_dir(&self) -> PathBuf {
        self.root.join(format!("{}-pkg", self.name))
    }

    /// Bundle executable: `<install_dir>/<name>[.exe]`.
    #[must_use]
    pub fn executable_path(&self) -> PathBuf {
        self.install_dir()
            .join(format!("{}{}", self.name, self.exe_suffix))
    }

    /// Path of the installed metadata document.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.install_dir().join(METADATA_FILE_NAME)
    }

    /// Check if the bundle executable exists.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.executable_path().is_file()
    }

    /// Reload metadata from disk and return the fresh snapshot.
    ///
    /// Metadata counts as present only when the executable exists and the
    /// document parses and is valid; anything else is logged and treated as
    /// absent.
    pub fn reload_metadata(&mut self) -> Option<Arc<BundleMetadata>> {
        self.metadata = None;

        let executable = self.executable_path();
        if !executable.is_file() {
            tracing::debug!(
                "{} not installed: {} does not exist",
                self.display_name,
                executable.display()
            );
            return None;
        }

        match BundleMetadata::load_from_dir(&self.install_dir()) {
            Ok(Some(metadata)) if !metadata.is_valid() => {
                tracing::error!(
                    "Ignoring invalid {} metadata at {}: version or dist missing",
                    self.display_name,
                    self.metadata_path().display()
                );
            }
            Ok(Some(metadata)) => {
                tracing::debug!("Loaded {} {}", self.display_name, metadata.version_label());
                self.metadata = Some(Arc::new(metadata));
            }
            Ok(None) => {
                tracing::debug!(
                    "No metadata for {} at {}",
                    self.display_name,
                    self.metadata_path().display()
                );
            }
            Err(e) => {
                tracing::error!("Failed to load {} metadata: {}", self.display_name, e);
            }
        }
        self.metadata.clone()
    }
}

impl BundleLocation for LocalBundle {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn metadata(&self) -> Option<Arc<BundleMetadata>> {
        self.metadata.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{FixedPlatform, Platform};
    use std::fs;
    use tempfile::tempdir;

    fn bundle(root: &Path, platform: Platform) -> LocalBundle {
        LocalBundle::new(root, "tool", "Tool", &FixedPlatform::new(platform))
    }

    #[test]
    fn test_paths() {
        let local = bundle(Path::new("/opt/bundles"), Platform::Linux);
        assert_eq!(local.install_dir(), PathBuf::from("/opt/bundles/tool-pkg"));
        assert_eq!(
            local.executable_path(),
            PathBuf::from("/opt/bundles/tool-pkg/tool")
        );

        let windows = bundle(Path::new("/opt/bundles"), Platform::Windows);
        assert!(windows.executable_path().ends_with("tool.exe"));
    }

    #[test]
    fn test_metadata_requires_executable() {
        let dir = tempdir().unwrap();
        let mut local = bundle(dir.path(), Platform::Linux);
        fs::create_dir_all(local.install_dir()).unwrap();
        BundleMetadata::new("1.0", "tool.zip")
            .write_to_dir(&local.install_dir())
            .unwrap();

        assert!(local.reload_metadata().is_none());

        fs::write(local.executable_path(), "bin").unwrap();
        let meta = local.reload_metadata().unwrap();
        assert_eq!(meta.version, "1.0");
        assert_eq!(local.version_label(), "1.0");
    }

    #[test]
    fn test_reload_is_idempotent_and_clears() {
        let dir = tempdir().unwrap();
        let mut local = bundle(dir.path(), Platform::Linux);
        fs::create_dir_all(local.install_dir()).unwrap();
        fs::write(local.executable_path(), "bin").unwrap();
        BundleMetadata::new("1.0", "tool.zip")
            .write_to_dir(&local.install_dir())
            .unwrap();

        let first = local.reload_metadata();
        let second = local.reload_metadata();
        assert_eq!(first, second);

        fs::remove_file(local.executable_path()).unwrap();
        assert!(local.reload_metadata().is_none());
        assert!(local.metadata().is_none());
    }

    #[test]
    fn test_malformed_metadata_is_absent() {
        let dir = tempdir().unwrap();
        let mut local = bundle(dir.path(), Platform::Linux);
        fs::create_dir_all(local.install_dir()).unwrap();
        fs::write(local.executable_path(), "bin").unwrap();
        fs::write(local.metadata_path(), "{broken").unwrap();

        assert!(local.reload_metadata().is_none());
        assert_eq!(local.version_label(), "N/A");
    }

    #[test]
    fn test_invalid_metadata_is_absent() {
        let dir = tempdir().unwrap();
        let mut local = bundle(dir.path(), Platform::Linux);
        fs::create_dir_all(local.install_dir()).unwrap();
        fs::write(local.executable_path(), "bin").unwrap();
        fs::write(local.metadata_path(), r#"{"version": "9.0"}"#).unwrap();

        assert!(local.reload_metadata().is_none());
        assert!(local.metadata().is_none());
        assert!(local.is_installed());
    }
}
