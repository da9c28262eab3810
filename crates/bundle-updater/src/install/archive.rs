//! Archive extraction.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::error::{Phase, Result, UpdateError};

/// Archive type for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// ZIP archive
    Zip,
    /// gzip-compressed tar archive
    TarGz,
}

impl ArchiveType {
    /// Get a human-readable label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Zip => "ZIP",
            Self::TarGz => "tar.gz",
        }
    }

    /// File extension used for temporary downloads of this type.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::TarGz => ".tar.gz",
        }
    }

    /// Detect the archive type from a file or URL name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let lower = lower.split(['?', '#']).next().unwrap_or_default();

        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    /// Detect the archive type from its leading bytes.
    #[must_use]
    pub fn from_magic(header: &[u8]) -> Option<Self> {
        if header.starts_with(b"PK\x03\x04") {
            Some(Self::Zip)
        } else if header.starts_with(&[0x1f, 0x8b]) {
            Some(Self::TarGz)
        } else {
            None
        }
    }

    /// Detect the type of the archive at `path`, preferring the name.
    pub fn detect(name: &str, path: &Path) -> Result<Self> {
        if let Some(kind) = Self::from_name(name) {
            return Ok(kind);
        }

        let mut header = [0u8; 4];
        let mut file =
            File::open(path).map_err(|e| UpdateError::fs(Phase::Extraction, "open", path, e))?;
        let n = read_up_to(&mut file, &mut header)
            .map_err(|e| UpdateError::fs(Phase::Extraction, "read", path, e))?;

        Self::from_magic(&header[..n]).ok_or_else(|| {
            UpdateError::Archive(format!("unrecognized archive format for {name}"))
        })
    }
}

impl std::fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Normalize an archive entry name into a relative path.
///
/// Leading and trailing separators are stripped. Returns `Ok(None)` for
/// entries that name the archive root. Entries with `..` components or a
/// drive prefix are rejected.
pub fn sanitize_entry_path(name: &str) -> Result<Option<PathBuf>> {
    let unsafe_entry = || UpdateError::UnsafeArchiveEntry {
        entry: name.to_string(),
    };

    let trimmed = name.trim_matches(['/', '\\']);
    let mut path = PathBuf::new();
    for part in trimmed.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => return Err(unsafe_entry()),
            p if p.contains(':') => return Err(unsafe_entry()),
            p => path.push(p),
        }
    }

    if path.is_absolute() || path.has_root() {
        return Err(unsafe_entry());
    }
    Ok((!path.as_os_str().is_empty()).then_some(path))
}

/// Extract the archive at `archive_path` into the existing directory `dest`.
pub fn extract_archive(archive_path: &Path, kind: ArchiveType, dest: &Path) -> Result<()> {
    tracing::debug!(
        "Extracting {} archive {} into {}",
        kind,
        archive_path.display(),
        dest.display()
    );

    let file = File::open(archive_path)
        .map_err(|e| UpdateError::fs(Phase::Extraction, "open", archive_path, e))?;
    let reader = BufReader::new(file);

    match kind {
        ArchiveType::Zip => extract_zip(reader, dest),
        ArchiveType::TarGz => extract_tar_gz(reader, dest),
    }
}

fn extract_zip(reader: BufReader<File>, dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(reader)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = sanitize_entry_path(entry.name())? else {
            continue;
        };
        ensure_no_linked_parent(dest, &relative, entry.name())?;
        let target = dest.join(&relative);
        let mode = entry.unix_mode();

        if entry.is_dir() {
            create_dir(&target)?;
            continue;
        }
        if mode.is_some_and(is_symlink_mode) {
            let mut link = String::new();
            entry
                .read_to_string(&mut link)
                .map_err(|e| UpdateError::Archive(format!("failed to read {}: {e}", entry.name())))?;
            create_symlink(&relative, &link, &target, entry.name())?;
            continue;
        }

        write_entry(&mut entry, &target)?;
        if let Some(mode) = mode {
            set_mode(&target, mode)?;
        }
    }
    Ok(())
}

fn extract_tar_gz(reader: BufReader<File>, dest: &Path) -> Result<()> {
    let archive_error = |e: io::Error| UpdateError::Archive(format!("failed to read tar.gz: {e}"));
    let mut archive = Archive::new(GzDecoder::new(reader));

    for entry in archive.entries().map_err(archive_error)? {
        let mut entry = entry.map_err(archive_error)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(relative) = sanitize_entry_path(&name)? else {
            continue;
        };
        ensure_no_linked_parent(dest, &relative, &name)?;
        let target = dest.join(&relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            create_dir(&target)?;
        } else if entry_type.is_file() {
            let mode = entry.header().mode().ok();
            write_entry(&mut entry, &target)?;
            if let Some(mode) = mode {
                set_mode(&target, mode)?;
            }
        } else if entry_type.is_symlink() {
            let link = entry
                .link_name_bytes()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            create_symlink(&relative, &link, &target, &name)?;
        } else {
            tracing::warn!("Skipping unsupported tar entry {} ({:?})", name, entry_type);
        }
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .map_err(|e| UpdateError::fs(Phase::Extraction, "create directory", path, e))
}

fn write_entry(reader: &mut impl Read, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        create_dir(parent)?;
    }
    let mut out = File::create(target)
        .map_err(|e| UpdateError::fs(Phase::Extraction, "create", target, e))?;
    io::copy(reader, &mut out)
        .map_err(|e| UpdateError::fs(Phase::Extraction, "write", target, e))?;
    Ok(())
}

/// Resolve a symbolic link's `link` text against the directory holding
/// `relative` and return the normalized path it names, relative to the
/// extraction root.
///
/// Absolute targets and targets that climb above the root are rejected.
fn resolve_link_target(relative: &Path, link: &str, entry: &str) -> Result<PathBuf> {
    let unsafe_entry = || UpdateError::UnsafeArchiveEntry {
        entry: format!("{entry} -> {link}"),
    };
    if link.is_empty() || link.starts_with(['/', '\\']) || link.contains(':') {
        return Err(unsafe_entry());
    }

    let mut resolved: Vec<&std::ffi::OsStr> = relative
        .parent()
        .map(|parent| parent.iter().collect())
        .unwrap_or_default();
    for part in link.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                resolved.pop().ok_or_else(unsafe_entry)?;
            }
            p => resolved.push(std::ffi::OsStr::new(p)),
        }
    }
    Ok(resolved.into_iter().collect())
}

/// Reject entries that would be written through a link created earlier in
/// the same archive.
fn ensure_no_linked_parent(dest: &Path, relative: &Path, entry: &str) -> Result<()> {
    let mut current = dest.to_path_buf();
    let Some(parent) = relative.parent() else {
        return Ok(());
    };
    for part in parent {
        current.push(part);
        if fs::symlink_metadata(&current).is_ok_and(|meta| meta.file_type().is_symlink()) {
            return Err(UpdateError::UnsafeArchiveEntry {
                entry: entry.to_string(),
            });
        }
    }
    Ok(())
}

fn create_symlink(relative: &Path, link: &str, target: &Path, entry: &str) -> Result<()> {
    let resolved = resolve_link_target(relative, link, entry)?;
    tracing::trace!("Linking {} -> {}", relative.display(), resolved.display());
    if let Some(parent) = target.parent() {
        create_dir(parent)?;
    }
    write_symlink(&link.replace('\\', "/"), target)
}

#[cfg(unix)]
fn write_symlink(link: &str, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, target)
        .map_err(|e| UpdateError::fs(Phase::Extraction, "create symlink", target, e))
}

#[cfg(not(unix))]
fn write_symlink(link: &str, target: &Path) -> Result<()> {
    tracing::warn!(
        "Skipping symbolic link {} -> {}: not supported on this platform",
        target.display(),
        link
    );
    Ok(())
}

const fn is_symlink_mode(mode: u32) -> bool {
    mode & 0o170_000 == 0o120_000
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = mode & 0o777;
    if permissions == 0 {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(permissions))
        .map_err(|e| UpdateError::fs(Phase::Extraction, "set permissions", path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
