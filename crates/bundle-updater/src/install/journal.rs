//! Swap journal.
//!
//! A small JSON file next to the install directory records how far a swap
//! got, so an interrupted swap can be finished or undone on the next run.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Phase, Result, UpdateError};
use crate::fs_ops::{atomic_write, remove_file_if_exists, sibling};

/// Progress of a swap, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapPhase {
    /// `<dest>.new` holds the complete new content.
    Staged,
    /// `<dest>.old` holds the complete previous content.
    OldAside,
    /// `<dest>` holds the complete new content.
    NewInPlace,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalRecord {
    phase: SwapPhase,
    updated: DateTime<Utc>,
}

/// Handle to the journal of one install directory.
#[derive(Debug, Clone)]
pub struct SwapJournal {
    path: PathBuf,
}

impl SwapJournal {
    /// Journal for the install directory `dest`.
    #[must_use]
    pub fn for_destination(dest: &Path) -> Self {
        Self {
            path: sibling(dest, ".swap.json"),
        }
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably record `phase`.
    pub fn record(&self, phase: SwapPhase, during: Phase) -> Result<()> {
        tracing::debug!("Swap journal {} -> {:?}", self.path.display(), phase);
        let record = JournalRecord {
            phase,
            updated: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&record).map_err(|source| UpdateError::Parse {
            origin: self.path.display().to_string(),
            source,
        })?;
        atomic_write(&self.path, &json, during)
    }

    /// Read the recorded phase. A missing journal is `None`; an unreadable
    /// one is logged and treated as missing.
    pub fn read(&self) -> Result<Option<SwapPhase>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(UpdateError::fs(Phase::Recovery, "read", &self.path, e)),
        };
        match serde_json::from_str::<JournalRecord>(&content) {
            Ok(record) => Ok(Some(record.phase)),
            Err(e) => {
                tracing::warn!("Ignoring corrupt swap journal {}: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    /// Remove the journal.
    pub fn clear(&self, during: Phase) -> Result<()> {
        remove_file_if_exists(&self.path, during).map(|_| ())
    }
}
