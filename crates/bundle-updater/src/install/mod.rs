//! Archive installation with a crash-safe directory swap.
//!
//! Replacing an existing installation goes through these steps:
//!
//! 1. Extract into `<dest>.new` and write the metadata document there
//! 2. Move `<dest>` to `<dest>.old`
//! 3. Move `<dest>.new` to `<dest>`
//! 4. Delete `<dest>.old`
//!
//! Each completed step is recorded in `<dest>.swap.json`, which [`recover`]
//! uses to finish or undo a swap interrupted by a crash. A first install
//! extracts straight into `<dest>` and never creates the siblings.

mod archive;
mod journal;
mod recovery;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Phase, Result, UpdateError};
use crate::fs_ops::{move_dir, remove_dir_if_exists, sibling};
use crate::metadata::BundleMetadata;

pub use archive::{ArchiveType, extract_archive, sanitize_entry_path};
pub use journal::{SwapJournal, SwapPhase};
pub use recovery::{RecoveryAction, recover};

/// Suffix of the staging directory.
pub const STAGING_SUFFIX: &str = ".new";

/// Suffix of the backup directory.
pub const BACKUP_SUFFIX: &str = ".old";

/// How an install changed the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallKind {
    /// The destination did not exist before.
    Fresh,
    /// An existing installation was replaced.
    Replaced,
}

impl InstallKind {
    /// Check if this was the first install.
    #[must_use]
    pub const fn is_first_install(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Installs downloaded archives into one destination directory.
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    dest: PathBuf,
    journal: SwapJournal,
}

impl ArchiveInstaller {
    /// Installer for `dest`.
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        let dest = dest.into();
        let journal = SwapJournal::for_destination(&dest);
        Self { dest, journal }
    }

    /// Destination directory.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Staging sibling `<dest>.new`.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        sibling(&self.dest, STAGING_SUFFIX)
    }

    /// Backup sibling `<dest>.old`.
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        sibling(&self.dest, BACKUP_SUFFIX)
    }

    /// Repair a swap interrupted by an earlier run.
    pub fn recover(&self) -> Result<RecoveryAction> {
        recover(&self.dest)
    }

    /// Install the archive at `archive_path` and write `metadata` into it.
    ///
    /// `artifact_name` is the name the archive was published under and is
    /// used to detect its format. Any interrupted swap is repaired first.
    pub fn install(
        &self,
        archive_path: &Path,
        artifact_name: &str,
        metadata: &BundleMetadata,
    ) -> Result<InstallKind> {
        let action = self.recover()?;
        if action != RecoveryAction::Clean {
            tracing::info!("Recovered {}: {}", self.dest.display(), action);
        }

        let kind = ArchiveType::detect(artifact_name, archive_path)?;
        if self.dest.exists() {
            self.install_replace(archive_path, kind, metadata)?;
            Ok(InstallKind::Replaced)
        } else {
            self.install_fresh(archive_path, kind, metadata)?;
            Ok(InstallKind::Fresh)
        }
    }

    fn install_fresh(
        &self,
        archive_path: &Path,
        kind: ArchiveType,
        metadata: &BundleMetadata,
    ) -> Result<()> {
        tracing::info!("Installing {} into {}", metadata.version_label(), self.dest.display());

        fs::create_dir_all(&self.dest).map_err(|e| {
            UpdateError::fs(Phase::Extraction, "create directory", &self.dest, e)
        })?;

        if let Err(e) = populate(archive_path, kind, &self.dest, metadata) {
            discard(&self.dest);
            return Err(e);
        }
        Ok(())
    }

    fn install_replace(
        &self,
        archive_path: &Path,
        kind: ArchiveType,
        metadata: &BundleMetadata,
    ) -> Result<()> {
        let staging = self.staging_dir();
        let backup = self.backup_dir();
        tracing::info!(
            "Staging {} in {}",
            metadata.version_label(),
            staging.display()
        );

        remove_dir_if_exists(&staging, Phase::Extraction)?;
        fs::create_dir_all(&staging)
            .map_err(|e| UpdateError::fs(Phase::Extraction, "create directory", &staging, e))?;

        if let Err(e) = populate(archive_path, kind, &staging, metadata) {
            discard(&staging);
            return Err(e);
        }
        self.journal.record(SwapPhase::Staged, Phase::Swap)?;

        match self.swap(&staging, &backup) {
            Ok(()) => Ok(()),
            Err(e) if self.journal.read().ok().flatten() == Some(SwapPhase::NewInPlace) => {
                tracing::warn!(
                    "Installed into {} but cleanup failed: {}",
                    self.dest.display(),
                    e
                );
                Ok(())
            }
            Err(e) => {
                if let Err(abort) = self.abort_swap(&staging, &backup) {
                    tracing::error!(
                        "Failed to restore {} after failed swap: {}",
                        self.dest.display(),
                        abort
                    );
                }
                Err(e)
            }
        }
    }

    fn swap(&self, staging: &Path, backup: &Path) -> Result<()> {
        remove_dir_if_exists(backup, Phase::Swap)?;
        move_dir(&self.dest, backup, Phase::Swap, || {
            self.journal.record(SwapPhase::OldAside, Phase::Swap)
        })?;
        move_dir(staging, &self.dest, Phase::Swap, || {
            self.journal.record(SwapPhase::NewInPlace, Phase::Swap)
        })?;
        remove_dir_if_exists(backup, Phase::Swap)?;
        self.journal.clear(Phase::Swap)?;
        tracing::info!("Swapped new content into {}", self.dest.display());
        Ok(())
    }

    /// Put the previous content back after a swap failed before the new
    /// content was complete in place.
    fn abort_swap(&self, staging: &Path, backup: &Path) -> Result<()> {
        let phase = self.journal.read()?;
        let restore = phase == Some(SwapPhase::OldAside) || !self.dest.exists();

        if restore && backup.is_dir() {
            tracing::warn!("Restoring previous content of {}", self.dest.display());
            remove_dir_if_exists(&self.dest, Phase::Swap)?;
            move_dir(backup, &self.dest, Phase::Swap, || Ok(()))?;
        }
        remove_dir_if_exists(staging, Phase::Swap)?;
        remove_dir_if_exists(backup, Phase::Swap)?;
        self.journal.clear(Phase::Swap)
    }
}

/// Extract, unwrap and write metadata into `dir`. The metadata document is
/// written last.
fn populate(
    archive_path: &Path,
    kind: ArchiveType,
    dir: &Path,
    metadata: &BundleMetadata,
) -> Result<()> {
    extract_archive(archive_path, kind, dir)?;
    if unwrap_single_dir(dir)? {
        tracing::debug!("Unwrapped single top-level directory in {}", dir.display());
    }
    metadata.write_to_dir(dir)
}

fn discard(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        tracing::warn!("Failed to remove incomplete {}: {}", dir.display(), e);
    }
}

/// If `dir` contains exactly one entry and it is a directory, move that
/// directory's children up into `dir` and remove it.
///
/// Returns whether anything was moved.
pub fn unwrap_single_dir(dir: &Path) -> Result<bool> {
    let phase = Phase::Extraction;
    let read = |path: &Path| -> Result<Vec<fs::DirEntry>> {
        fs::read_dir(path)
            .and_then(|entries| entries.collect())
            .map_err(|e| UpdateError::fs(phase, "read directory", path, e))
    };

    let entries = read(dir)?;
    let [only] = entries.as_slice() else {
        return Ok(false);
    };
    let is_dir = only
        .file_type()
        .map_err(|e| UpdateError::fs(phase, "inspect", only.path(), e))?
        .is_dir();
    if !is_dir {
        return Ok(false);
    }

    // The wrapper may contain a child with its own name.
    let wrapper = dir.join(".unwrap-in-progress");
    fs::rename(only.path(), &wrapper)
        .map_err(|e| UpdateError::fs(phase, "move", only.path(), e))?;

    for child in read(&wrapper)? {
        let target = dir.join(child.file_name());
        fs::rename(child.path(), &target)
            .map_err(|e| UpdateError::fs(phase, "move", child.path(), e))?;
    }
    fs::remove_dir(&wrapper).map_err(|e| UpdateError::fs(phase, "remove directory", &wrapper, e))?;
    Ok(true)
}
