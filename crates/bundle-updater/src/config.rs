//! Updater configuration.
//!
//! Stored as a JSON file. Every field has a default so partial files load.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Phase, Result, UpdateError};
use crate::fs_ops::atomic_write;
use crate::location::DEFAULT_ARCH;

/// Default number of hours between scheduled checks.
pub const DEFAULT_CHECK_INTERVAL_HOURS: u32 = 24;

fn default_install_root() -> PathBuf {
    PathBuf::from("bundles")
}

fn default_bundle_name() -> String {
    "bundle".to_string()
}

fn default_display_name() -> String {
    "Bundle".to_string()
}

fn default_arch() -> String {
    DEFAULT_ARCH.to_string()
}

const fn default_enabled() -> bool {
    true
}

const fn default_check_interval() -> u32 {
    DEFAULT_CHECK_INTERVAL_HOURS
}

/// Settings for one managed bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Base URL releases are published under.
    #[serde(default)]
    pub base_url: String,

    /// Directory the bundle is installed under.
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// Bundle name; also the executable name.
    #[serde(default = "default_bundle_name")]
    pub bundle_name: String,

    /// Name shown to users.
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Architecture directory on the server.
    #[serde(default = "default_arch")]
    pub arch: String,

    /// Host application version, used in artifact paths when the metadata
    /// document does not name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_version: Option<String>,

    /// Whether scheduled checks run.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Version to skip (user chose "Skip This Version").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_version: Option<String>,

    /// Last time we checked for updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,

    /// Hours between scheduled checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_hours: u32,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            install_root: default_install_root(),
            bundle_name: default_bundle_name(),
            display_name: default_display_name(),
            arch: default_arch(),
            plugin_version: None,
            enabled: default_enabled(),
            skipped_version: None,
            last_check: None,
            check_interval_hours: DEFAULT_CHECK_INTERVAL_HOURS,
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| UpdateError::fs(Phase::Local, "read", path, e))?;
        serde_json::from_str(&content).map_err(|source| UpdateError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    /// Load configuration from `path`, or the defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(UpdateError::Filesystem { source, .. }) if source.kind() == ErrorKind::NotFound => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Save configuration to `path` atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|source| UpdateError::Parse {
            origin: path.display().to_string(),
            source,
        })?;
        atomic_write(path, &json, Phase::Local)?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Check if a scheduled check is due.
    ///
    /// Returns `true` only if:
    /// - Scheduled checks are enabled
    /// - The check interval has passed since the last check
    #[must_use]
    pub fn should_check_now(&self) -> bool {
        self.should_check_at(Utc::now())
    }

    /// Like [`should_check_now`](Self::should_check_now) at time `now`.
    #[must_use]
    pub fn should_check_at(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }

        match self.last_check {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed.num_hours() >= i64::from(self.check_interval_hours)
            }
        }
    }

    /// Check if a version should be skipped based on user preference.
    #[must_use]
    pub fn should_skip_version(&self, version: &str) -> bool {
        match &self.skipped_version {
            Some(skipped) => {
                let bare = |v: &str| v.strip_prefix('v').unwrap_or(v).to_string();
                bare(skipped) == bare(version)
            }
            None => false,
        }
    }

    /// Record that we just checked for updates.
    pub fn record_check(&mut self) {
        self.last_check = Some(Utc::now());
    }

    /// Set a version to skip.
    pub fn skip_version(&mut self, version: impl Into<String>) {
        self.skipped_version = Some(version.into());
    }

    /// Clear the skipped version.
    pub fn clear_skipped_version(&mut self) {
        self.skipped_version = None;
    }
}
