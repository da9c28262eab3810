//! Bundle release metadata.
//!
//! The same JSON document describes a release on the server (`meta.json`) and
//! the installed copy on disk (`metadata.json` inside the install directory).

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Phase, Result, UpdateError};
use crate::fs_ops::atomic_write;
use crate::version::{Version, compare};

/// File name of the metadata document inside an install directory.
pub const METADATA_FILE_NAME: &str = "metadata.json";

/// Description of a bundle release.
///
/// Instances are never mutated after loading; locations hand them out as
/// shared snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// Release version.
    #[serde(default)]
    pub version: String,

    /// Distribution archive: an absolute URL or a file name relative to the
    /// remote layout.
    #[serde(default, rename = "dist")]
    pub distribution: String,

    /// Compatible host application version.
    #[serde(default)]
    pub plugin_version: String,

    /// Release note shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Changelog entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<String>>,

    /// Publication timestamp, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Last modification time, passed through untouched.
    #[serde(default)]
    pub last_modified: i64,
}

impl BundleMetadata {
    /// Create metadata for a release.
    pub fn new(version: impl Into<String>, distribution: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            distribution: distribution.into(),
            ..Default::default()
        }
    }

    /// Parse a metadata document. `origin` names the source in errors.
    pub fn from_json(json: &str, origin: &str) -> Result<Self> {
        Self::from_slice(json.as_bytes(), origin)
    }

    /// Parse a metadata document from raw bytes. Invalid UTF-8 is a parse
    /// error.
    pub fn from_slice(bytes: &[u8], origin: &str) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|source| UpdateError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Parse a metadata document and reject it unless it is valid.
    pub fn from_slice_valid(bytes: &[u8], origin: &str) -> Result<Self> {
        let metadata = Self::from_slice(bytes, origin)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|source| UpdateError::Parse {
            origin: "serialized metadata".to_string(),
            source,
        })
    }

    /// Metadata is valid when both the version and the distribution
    /// reference are present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.version.trim().is_empty() && !self.distribution.trim().is_empty()
    }

    /// Return an error describing what makes this metadata invalid.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(UpdateError::InvalidMetadata("missing version".to_string()));
        }
        if self.distribution.trim().is_empty() {
            return Err(UpdateError::InvalidMetadata(
                "missing distribution reference".to_string(),
            ));
        }
        Ok(())
    }

    /// Version for display, `"N/A"` when unknown.
    #[must_use]
    pub fn version_label(&self) -> &str {
        if self.version.is_empty() {
            "N/A"
        } else {
            &self.version
        }
    }

    /// Release note, empty when absent.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    /// Check if the release carries changelog entries.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Parsed version.
    #[must_use]
    pub fn parsed_version(&self) -> Version {
        Version::parse(&self.version)
    }

    /// Check if this release is newer than `other`. Anything is newer than
    /// no installation at all.
    #[must_use]
    pub fn is_newer_than(&self, other: Option<&BundleMetadata>) -> bool {
        other.is_none_or(|o| self.is_newer_than_version(&o.version))
    }

    /// Check if this release is newer than a version string.
    #[must_use]
    pub fn is_newer_than_version(&self, version: &str) -> bool {
        compare(&self.version, version).is_gt()
    }

    /// Check if this release is older than `other`. Nothing is older than
    /// no installation.
    #[must_use]
    pub fn is_older_than(&self, other: Option<&BundleMetadata>) -> bool {
        other.is_some_and(|o| self.is_older_than_version(&o.version))
    }

    /// Check if this release is older than a version string.
    #[must_use]
    pub fn is_older_than_version(&self, version: &str) -> bool {
        compare(&self.version, version).is_lt()
    }

    /// Load metadata from `dir/metadata.json`.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(METADATA_FILE_NAME);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(UpdateError::fs(Phase::Local, "read", path, e)),
        };
        Self::from_slice(&content, &path.display().to_string()).map(Some)
    }

    /// Write this metadata to `dir/metadata.json`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        let path = dir.join(METADATA_FILE_NAME);
        let json = self.to_json()?;
        tracing::debug!("Saving {}", path.display());
        atomic_write(&path, json.as_bytes(), Phase::Local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "version": "1.2.0",
        "dist": "tool-1.2.0.zip",
        "pluginVersion": "0.9.1",
        "message": "Faster startup",
        "changes": ["Fix crash", "New flag"],
        "timestamp": "2018-04-01T12:00:00Z",
        "lastModified": 1522584000
    }"#;

    #[test]
    fn test_parse_document() {
        let meta = BundleMetadata::from_json(SAMPLE, "test").unwrap();
        assert_eq!(meta.version, "1.2.0");
        assert_eq!(meta.distribution, "tool-1.2.0.zip");
        assert_eq!(meta.plugin_version, "0.9.1");
        assert_eq!(meta.message(), "Faster startup");
        assert!(meta.has_changes());
        assert_eq!(meta.last_modified, 1_522_584_000);
        assert!(meta.is_valid());
    }

    #[test]
    fn test_missing_fields_are_invalid_not_errors() {
        let meta = BundleMetadata::from_json(r#"{"version": "1.0"}"#, "test").unwrap();
        assert!(!meta.is_valid());
        assert!(matches!(
            meta.validate(),
            Err(UpdateError::InvalidMetadata(_))
        ));
        assert!(matches!(
            BundleMetadata::from_slice_valid(br#"{"dist": "a.zip"}"#, "test"),
            Err(UpdateError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_malformed_document_is_parse_error() {
        let result = BundleMetadata::from_json("{not json", "https://example.com/meta.json");
        match result {
            Err(UpdateError::Parse { origin, .. }) => assert!(origin.contains("meta.json")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_utf8_is_parse_error() {
        let bytes = b"{\"version\": \"1.0\xff\", \"dist\": \"a.zip\"}";
        assert!(matches!(
            BundleMetadata::from_slice(bytes, "meta.json"),
            Err(UpdateError::Parse { .. })
        ));
        assert!(BundleMetadata::from_slice(br#"{"version": "1.0", "dist": "a.zip"}"#, "m").is_ok());
    }

    #[test]
    fn test_labels() {
        let meta = BundleMetadata::default();
        assert_eq!(meta.version_label(), "N/A");
        assert_eq!(meta.message(), "");
        assert!(!meta.has_changes());
    }

    #[test]
    fn test_newer_and_older() {
        let old = BundleMetadata::new("0.3.3", "a.zip");
        let new = BundleMetadata::new("1.0.1", "b.zip");

        assert!(new.is_newer_than(None));
        assert!(!new.is_newer_than(Some(&new)));
        assert!(new.is_newer_than(Some(&old)));
        assert!(!old.is_newer_than(Some(&new)));

        assert!(!old.is_older_than(None));
        assert!(old.is_older_than(Some(&new)));
        assert!(!new.is_older_than(Some(&new)));
    }

    #[test]
    fn test_dir_round_trip() {
        let dir = tempdir().unwrap();
        assert_eq!(BundleMetadata::load_from_dir(dir.path()).unwrap(), None);

        let meta = BundleMetadata::from_json(SAMPLE, "test").unwrap();
        meta.write_to_dir(dir.path()).unwrap();

        let loaded = BundleMetadata::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, meta);

        let raw = fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        assert!(raw.contains("\"dist\""));
        assert!(raw.contains("\"pluginVersion\""));
    }

    #[test]
    fn test_write_replaces_whole_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(METADATA_FILE_NAME), "{trunc").unwrap();

        BundleMetadata::new("2.0", "b.zip")
            .write_to_dir(dir.path())
            .unwrap();

        let loaded = BundleMetadata::load_from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.version, "2.0");
        assert!(!dir.path().join("metadata.json.tmp").exists());
    }
}
