//! Directory moves and atomic file writes.
//!
//! True atomic directory replacement is not available across platforms and
//! volumes, so a move is a `rename` when possible and a recursive copy
//! followed by deletion of the source otherwise.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Phase, Result, UpdateError};

/// `path` with `suffix` appended to its final component.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `bytes` to `path` through a temp file and rename.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8], phase: Phase) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| UpdateError::fs(phase, "create directory", parent, e))?;
    }

    let temp_path = sibling(path, ".tmp");
    let mut file =
        File::create(&temp_path).map_err(|e| UpdateError::fs(phase, "create", &temp_path, e))?;
    file.write_all(bytes)
        .map_err(|e| UpdateError::fs(phase, "write", &temp_path, e))?;
    file.sync_all()
        .map_err(|e| UpdateError::fs(phase, "sync", &temp_path, e))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| UpdateError::fs(phase, "replace", path, e))
}

/// Remove a file if it exists.
pub(crate) fn remove_file_if_exists(path: &Path, phase: Phase) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(UpdateError::fs(phase, "remove", path, e)),
    }
}

/// Remove a directory tree if it exists.
pub(crate) fn remove_dir_if_exists(path: &Path, phase: Phase) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => faults::removal(path)
            .and_then(|()| fs::remove_dir_all(path))
            .map(|()| true)
            .map_err(|e| UpdateError::fs(phase, "remove directory", path, e)),
        Ok(_) => fs::remove_file(path)
            .map(|()| true)
            .map_err(|e| UpdateError::fs(phase, "remove", path, e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(UpdateError::fs(phase, "inspect", path, e)),
    }
}

/// Move the directory `src` to `dst`, which must not exist.
///
/// `on_complete` runs once `dst` holds a complete copy and before the source
/// is deleted, so callers can record that point durably.
pub(crate) fn move_dir(
    src: &Path,
    dst: &Path,
    phase: Phase,
    on_complete: impl FnOnce() -> Result<()>,
) -> Result<()> {
    match faults::rename(src, dst) {
        Ok(()) => return on_complete(),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(UpdateError::fs(phase, "move", src, e));
        }
        Err(e) => {
            tracing::debug!(
                "Rename {} -> {} failed ({}), copying instead",
                src.display(),
                dst.display(),
                e
            );
        }
    }

    let copied = copy_dir_all(src, dst, phase).and_then(|()| {
        faults::after_copy(src).map_err(|e| UpdateError::fs(phase, "copy", src, e))
    });
    if let Err(e) = copied {
        if let Err(cleanup) = fs::remove_dir_all(dst) {
            tracing::warn!(
                "Failed to remove partial copy {}: {}",
                dst.display(),
                cleanup
            );
        }
        return Err(e);
    }
    on_complete()?;
    fs::remove_dir_all(src).map_err(|e| UpdateError::fs(phase, "remove directory", src, e))
}

/// Recursively copy a directory tree, preserving file permissions.
pub(crate) fn copy_dir_all(src: &Path, dst: &Path, phase: Phase) -> Result<()> {
    fs::create_dir_all(dst).map_err(|e| UpdateError::fs(phase, "create directory", dst, e))?;

    let entries = fs::read_dir(src).map_err(|e| UpdateError::fs(phase, "read directory", src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| UpdateError::fs(phase, "read directory", src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| UpdateError::fs(phase, "inspect", &from, e))?;

        if file_type.is_dir() {
            copy_dir_all(&from, &to, phase)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to, phase)?;
        } else {
            fs::copy(&from, &to).map_err(|e| UpdateError::fs(phase, "copy", &from, e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path, phase: Phase) -> Result<()> {
    let target = fs::read_link(from).map_err(|e| UpdateError::fs(phase, "read link", from, e))?;
    std::os::unix::fs::symlink(&target, to)
        .map_err(|e| UpdateError::fs(phase, "create link", to, e))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path, phase: Phase) -> Result<()> {
    if from.is_dir() {
        copy_dir_all(from, to, phase)
    } else {
        fs::copy(from, to)
            .map(|_| ())
            .map_err(|e| UpdateError::fs(phase, "copy", from, e))
    }
}

/// Failure points for exercising the swap's error paths.
///
/// A plan applies to the current thread only and stays in force until
/// [`faults::clear`] or the next [`faults::set`].
#[cfg(test)]
pub(crate) mod faults {
    use std::cell::RefCell;
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};

    #[derive(Debug, Default, Clone)]
    pub(crate) struct FaultPlan {
        /// Make every `rename` in [`super::move_dir`] fail so the copy
        /// fallback runs.
        pub force_copy: bool,
        /// Fail the copy fallback of this source once the copy is complete.
        pub fail_copy_of: Option<PathBuf>,
        /// Fail removal of this directory.
        pub fail_removal_of: Option<PathBuf>,
    }

    thread_local! {
        static PLAN: RefCell<FaultPlan> = RefCell::default();
    }

    pub(crate) fn set(plan: FaultPlan) {
        PLAN.with(|current| *current.borrow_mut() = plan);
    }

    pub(crate) fn clear() {
        set(FaultPlan::default());
    }

    fn injected(what: &str, path: &Path) -> io::Error {
        io::Error::other(format!("injected {what} failure for {}", path.display()))
    }

    pub(super) fn rename(src: &Path, dst: &Path) -> io::Result<()> {
        // Keep NotFound so a missing source still fails fast.
        if PLAN.with(|plan| plan.borrow().force_copy) && src.exists() {
            return Err(injected("rename", src));
        }
        fs::rename(src, dst)
    }

    pub(super) fn after_copy(src: &Path) -> io::Result<()> {
        match PLAN.with(|plan| plan.borrow().fail_copy_of.clone()) {
            Some(path) if path == src => Err(injected("copy", src)),
            _ => Ok(()),
        }
    }

    pub(super) fn removal(path: &Path) -> io::Result<()> {
        match PLAN.with(|plan| plan.borrow().fail_removal_of.clone()) {
            Some(target) if target == path => Err(injected("remove", path)),
            _ => Ok(()),
        }
    }
}

#[cfg(not(test))]
mod faults {
    use std::fs;
    use std::io;
    use std::path::Path;

    #[inline]
    pub(super) fn rename(src: &Path, dst: &Path) -> io::Result<()> {
        fs::rename(src, dst)
    }

    #[inline]
    pub(super) const fn after_copy(_src: &Path) -> io::Result<()> {
        Ok(())
    }

    #[inline]
    pub(super) const fn removal(_path: &Path) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sibling() {
        assert_eq!(
            sibling(Path::new("/opt/tool-pkg"), ".new"),
            PathBuf::from("/opt/tool-pkg.new")
        );
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        atomic_write(&path, b"first", Phase::Local).unwrap();
        atomic_write(&path, b"second", Phase::Local).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!sibling(&path, ".tmp").exists());
    }

    #[test]
    fn test_move_dir_runs_hook_and_removes_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("bin")).unwrap();
        fs::write(src.join("bin").join("tool"), "x").unwrap();
        let dst = dir.path().join("dst");

        let mut called = false;
        move_dir(&src, &dst, Phase::Swap, || {
            called = true;
            Ok(())
        })
        .unwrap();

        assert!(called);
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst.join("bin").join("tool")).unwrap(), "x");
    }

    #[test]
    fn test_move_dir_copy_fallback_completes_before_removing_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("bin")).unwrap();
        fs::write(src.join("bin").join("tool"), "x").unwrap();
        let dst = dir.path().join("dst");

        faults::set(faults::FaultPlan {
            force_copy: true,
            ..Default::default()
        });
        let mut seen = None;
        let result = move_dir(&src, &dst, Phase::Swap, || {
            seen = Some((
                src.join("bin").join("tool").is_file(),
                fs::read_to_string(dst.join("bin").join("tool")).ok(),
            ));
            Ok(())
        });
        faults::clear();

        result.unwrap();
        assert_eq!(seen, Some((true, Some("x".to_string()))));
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst.join("bin").join("tool")).unwrap(), "x");
    }

    #[test]
    fn test_move_dir_failed_copy_keeps_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("tool"), "x").unwrap();
        let dst = dir.path().join("dst");

        faults::set(faults::FaultPlan {
            force_copy: true,
            fail_copy_of: Some(src.clone()),
            ..Default::default()
        });
        let mut called = false;
        let result = move_dir(&src, &dst, Phase::Swap, || {
            called = true;
            Ok(())
        });
        faults::clear();

        assert!(result.is_err());
        assert!(!called);
        assert!(!dst.exists());
        assert_eq!(fs::read_to_string(src.join("tool")).unwrap(), "x");
    }

    #[test]
    fn test_move_dir_hook_failure_keeps_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("tool"), "x").unwrap();
        let dst = dir.path().join("dst");

        faults::set(faults::FaultPlan {
            force_copy: true,
            ..Default::default()
        });
        let result = move_dir(&src, &dst, Phase::Swap, || {
            Err(UpdateError::Archive("journal unavailable".to_string()))
        });
        faults::clear();

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(src.join("tool")).unwrap(), "x");
    }

    #[test]
    fn test_move_missing_source_fails() {
        let dir = tempdir().unwrap();
        let err = move_dir(
            &dir.path().join("missing"),
            &dir.path().join("dst"),
            Phase::Swap,
            || Ok(()),
        )
        .unwrap_err();
        assert_eq!(err.phase(), Some(Phase::Swap));
    }

    #[test]
    fn test_copy_dir_all() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("a").join("b")).unwrap();
        fs::write(src.join("a").join("b").join("f.txt"), "deep").unwrap();
        fs::write(src.join("top.txt"), "top").unwrap();

        let dst = dir.path().join("copy");
        copy_dir_all(&src, &dst, Phase::Swap).unwrap();

        assert_eq!(fs::read_to_string(dst.join("top.txt")).unwrap(), "top");
        assert_eq!(
            fs::read_to_string(dst.join("a").join("b").join("f.txt")).unwrap(),
            "deep"
        );
        assert!(src.exists());
    }

    #[test]
    fn test_remove_helpers_tolerate_missing() {
        let dir = tempdir().unwrap();
        assert!(!remove_dir_if_exists(&dir.path().join("nope"), Phase::Swap).unwrap());
        assert!(!remove_file_if_exists(&dir.path().join("nope"), Phase::Swap).unwrap());

        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        assert!(remove_dir_if_exists(&sub, Phase::Swap).unwrap());
        assert!(!sub.exists());
    }
}
