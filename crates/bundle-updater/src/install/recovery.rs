//! Repair of interrupted swaps.

use std::fmt;
use std::path::Path;

use crate::error::{Phase, Result};
use crate::fs_ops::{move_dir, remove_dir_if_exists, sibling};

use super::journal::{SwapJournal, SwapPhase};
use super::{BACKUP_SUFFIX, STAGING_SUFFIX};

/// What [`recover`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Nothing needed repair.
    Clean,
    /// A staged update was moved into place.
    RolledForward,
    /// The new content was already in place; leftovers were removed.
    Completed,
    /// The previous content was restored from the backup.
    RolledBack,
    /// Incomplete staging or backup directories were deleted.
    DiscardedStaging,
}

impl RecoveryAction {
    /// Get a human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Clean => "nothing to recover",
            Self::RolledForward => "finished interrupted update",
            Self::Completed => "removed leftovers of completed update",
            Self::RolledBack => "restored previous installation",
            Self::DiscardedStaging => "discarded incomplete update files",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Inspect the swap journal and siblings of `dest` and finish or undo an
/// interrupted swap.
pub fn recover(dest: &Path) -> Result<RecoveryAction> {
    let phase = Phase::Recovery;
    let journal = SwapJournal::for_destination(dest);
    let staging = sibling(dest, STAGING_SUFFIX);
    let backup = sibling(dest, BACKUP_SUFFIX);

    match journal.read()? {
        Some(SwapPhase::Staged | SwapPhase::OldAside) if staging.is_dir() => {
            tracing::info!("Finishing interrupted update of {}", dest.display());
            remove_dir_if_exists(dest, phase)?;
            move_dir(&staging, dest, phase, || {
                journal.record(SwapPhase::NewInPlace, phase)
            })?;
            remove_dir_if_exists(&backup, phase)?;
            journal.clear(phase)?;
            return Ok(RecoveryAction::RolledForward);
        }
        // Staging is gone and dest is whole: the last move finished.
        Some(SwapPhase::NewInPlace) | Some(SwapPhase::OldAside) if dest.is_dir() => {
            tracing::info!("Cleaning up after update of {}", dest.display());
            remove_dir_if_exists(&staging, phase)?;
            remove_dir_if_exists(&backup, phase)?;
            journal.clear(phase)?;
            return Ok(RecoveryAction::Completed);
        }
        Some(recorded) => {
            tracing::warn!(
                "Swap journal for {} says {:?} but the directories disagree",
                dest.display(),
                recorded
            );
            journal.clear(phase)?;
        }
        None => {}
    }

    if backup.is_dir() && !dest.exists() {
        tracing::warn!("Restoring {} from {}", dest.display(), backup.display());
        move_dir(&backup, dest, phase, || Ok(()))?;
        remove_dir_if_exists(&staging, phase)?;
        return Ok(RecoveryAction::RolledBack);
    }

    let removed_staging = remove_dir_if_exists(&staging, phase)?;
    let removed_backup = remove_dir_if_exists(&backup, phase)?;
    if removed_staging || removed_backup {
        tracing::info!("Discarded incomplete update files next to {}", dest.display());
        Ok(RecoveryAction::DiscardedStaging)
    } else {
        Ok(RecoveryAction::Clean)
    }
}
