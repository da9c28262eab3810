//! Orchestration of metadata fetch, comparison, download and install.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

use crate::busy::{BusyGuard, BusyState};
use crate::download::{CancelToken, Transport, download_to_file, fetch_bytes};
use crate::error::{Phase, Result, UpdateError};
use crate::events::{InstallOutcome, UpdateEvent, UpdateListener};
use crate::install::{ArchiveInstaller, ArchiveType, RecoveryAction};
use crate::location::{BundleLocation, LocalBundle, RemoteBundle};
use crate::metadata::BundleMetadata;
use crate::platform::PlatformInfo;

/// Result of comparing the remote release with the installed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// The installed bundle is current.
    UpToDate,
    /// A newer release is available.
    UpdateAvailable(BundleMetadata),
}

impl UpdateDecision {
    /// The available release, if any.
    #[must_use]
    pub fn available(&self) -> Option<&BundleMetadata> {
        match self {
            Self::UpToDate => None,
            Self::UpdateAvailable(metadata) => Some(metadata),
        }
    }
}

/// Coordinates update operations for one bundle.
///
/// At most one operation runs at a time; a call made while another is in
/// progress fails with [`UpdateError::Busy`].
pub struct UpdateCoordinator {
    local: RwLock<LocalBundle>,
    remote: RwLock<RemoteBundle>,
    platform: Arc<dyn PlatformInfo>,
    transport: Arc<dyn Transport>,
    listener: Arc<dyn UpdateListener>,
    busy: Arc<BusyState>,
    cancel: CancelToken,
}

impl std::fmt::Debug for UpdateCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateCoordinator")
            .field("local", &*self.local_read())
            .field("remote", &*self.remote_read())
            .field("busy", &self.busy)
            .finish_non_exhaustive()
    }
}

impl UpdateCoordinator {
    /// Create a coordinator owning `local` and `remote`. Installed metadata
    /// is loaded immediately.
    pub fn new(
        mut local: LocalBundle,
        remote: RemoteBundle,
        platform: Arc<dyn PlatformInfo>,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn UpdateListener>,
    ) -> Self {
        local.reload_metadata();
        Self {
            local: RwLock::new(local),
            remote: RwLock::new(remote),
            platform,
            transport,
            busy: BusyState::new(Arc::clone(&listener)),
            listener,
            cancel: CancelToken::new(),
        }
    }

    fn local_read(&self) -> RwLockReadGuard<'_, LocalBundle> {
        self.local.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn local_write(&self) -> RwLockWriteGuard<'_, LocalBundle> {
        self.local.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn remote_read(&self) -> RwLockReadGuard<'_, RemoteBundle> {
        self.remote.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn remote_write(&self) -> RwLockWriteGuard<'_, RemoteBundle> {
        self.remote.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name shown to users.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.local_read().display_name().to_string()
    }

    /// Install directory of the managed bundle.
    #[must_use]
    pub fn install_dir(&self) -> PathBuf {
        self.local_read().install_dir()
    }

    /// Executable of the managed bundle.
    #[must_use]
    pub fn executable_path(&self) -> PathBuf {
        self.local_read().executable_path()
    }

    /// URL of the remote metadata document.
    #[must_use]
    pub fn metadata_url(&self) -> String {
        self.remote_read().metadata_url().to_string()
    }

    /// Check if an operation is in progress.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    /// Ask the running operation to stop. Downloads stop at the next chunk;
    /// extraction and swap are not interrupted once started.
    pub fn cancel(&self) {
        if self.is_busy() {
            tracing::info!("Cancel requested");
            self.cancel.cancel();
        }
    }

    /// Installed metadata snapshot.
    #[must_use]
    pub fn local_metadata(&self) -> Option<Arc<BundleMetadata>> {
        self.local_read().metadata()
    }

    /// Most recently fetched remote metadata.
    #[must_use]
    pub fn remote_metadata(&self) -> Option<Arc<BundleMetadata>> {
        self.remote_read().metadata()
    }

    /// Re-read installed metadata from disk.
    pub fn reload_local(&self) -> Option<Arc<BundleMetadata>> {
        self.local_write().reload_metadata()
    }

    /// Download and validate the remote metadata document.
    pub fn fetch_remote_metadata(&self) -> Result<BundleMetadata> {
        let _guard = self.begin()?;
        self.report(self.fetch_metadata_inner())
    }

    /// Fetch remote metadata and compare it with the installed version.
    /// Nothing is downloaded besides the metadata document.
    pub fn check_for_update(&self) -> Result<UpdateDecision> {
        let _guard = self.begin()?;
        self.report(self.check_inner())
    }

    /// Download the release described by `metadata` and install it.
    pub fn perform_update(&self, metadata: &BundleMetadata) -> Result<InstallOutcome> {
        let _guard = self.begin()?;
        self.report(self.update_inner(metadata))
    }

    /// Fetch the remote metadata and install that release without comparing
    /// versions. Used for the first download.
    pub fn download_and_install(&self) -> Result<InstallOutcome> {
        let _guard = self.begin()?;
        let result = self
            .fetch_metadata_inner()
            .and_then(|metadata| self.update_inner(&metadata));
        self.report(result)
    }

    /// Run [`perform_update`](Self::perform_update) on a worker thread.
    ///
    /// The busy flag is taken before the thread starts, so a concurrent
    /// caller is rejected immediately.
    pub fn spawn_update(
        self: &Arc<Self>,
        metadata: BundleMetadata,
    ) -> Result<JoinHandle<Result<InstallOutcome>>> {
        let guard = self.begin()?;
        let this = Arc::clone(self);
        std::thread::Builder::new()
            .name("bundle-update".to_string())
            .spawn(move || {
                let _guard: BusyGuard = guard;
                this.report(this.update_inner(&metadata))
            })
            .map_err(|e| UpdateError::fs(Phase::Local, "spawn worker for", self.install_dir(), e))
    }

    /// Repair a swap interrupted by an earlier run.
    pub fn recover(&self) -> Result<RecoveryAction> {
        let _guard = self.begin()?;
        let dest = self.install_dir();
        let result = ArchiveInstaller::new(&dest).recover();
        self.reload_local();
        self.report(result)
    }

    fn begin(&self) -> Result<BusyGuard> {
        let guard = self.busy.acquire()?;
        self.cancel.reset();
        Ok(guard)
    }

    fn emit(&self, event: UpdateEvent) {
        self.listener.on_event(&event);
    }

    fn progress(&self, text: String) {
        tracing::info!("{}", text);
        self.emit(UpdateEvent::Progress(text));
    }

    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_canceled() {
                tracing::info!("{} operation canceled", self.display_name());
            } else {
                tracing::error!("{} update failed: {}", self.display_name(), e);
            }
            self.emit(UpdateEvent::from_error(e));
        }
        result
    }

    fn ensure_supported(&self) -> Result<()> {
        if self.platform.is_supported() {
            Ok(())
        } else {
            Err(UpdateError::UnsupportedPlatform(format!(
                "{} ({})",
                self.platform.platform().display_name(),
                std::env::consts::ARCH
            )))
        }
    }

    fn fetch_metadata_inner(&self) -> Result<BundleMetadata> {
        self.ensure_supported()?;
        let url = self.remote_read().metadata_url().clone();
        let _span = tracing::info_span!("metadata_fetch", url = %url).entered();
        self.progress(format!("Checking for {} updates", self.display_name()));

        let body = fetch_bytes(self.transport.as_ref(), &url, &self.cancel, Phase::MetadataFetch)?;
        let metadata = BundleMetadata::from_slice_valid(&body, url.as_str())?;
        tracing::info!("Remote {} version is {}", self.display_name(), metadata.version);

        self.remote_write().set_metadata(Arc::new(metadata.clone()));
        self.emit(UpdateEvent::MetadataFetched(metadata.clone()));
        Ok(metadata)
    }

    fn check_inner(&self) -> Result<UpdateDecision> {
        let remote = self.fetch_metadata_inner()?;
        let local = self.reload_local();

        if remote.is_newer_than(local.as_deref()) {
            tracing::info!(
                "Update available: {} -> {}",
                local.as_deref().map_or("N/A", BundleMetadata::version_label),
                remote.version
            );
            Ok(UpdateDecision::UpdateAvailable(remote))
        } else {
            tracing::info!("{} is up to date", self.display_name());
            Ok(UpdateDecision::UpToDate)
        }
    }

    fn update_inner(&self, metadata: &BundleMetadata) -> Result<InstallOutcome> {
        self.ensure_supported()?;
        metadata.validate()?;
        let _span = tracing::info_span!("update", version = %metadata.version).entered();

        let url = self.remote_read().artifact_url(metadata)?;
        let artifact_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map_or_else(|| metadata.distribution.clone(), str::to_string);

        let mut archive = tempfile::Builder::new()
            .prefix("bundle")
            .suffix(&temp_suffix(&artifact_name))
            .tempfile()
            .map_err(|e| {
                UpdateError::fs(
                    Phase::ArtifactFetch,
                    "create temporary file in",
                    std::env::temp_dir(),
                    e,
                )
            })?;
        let archive_path = archive.path().to_path_buf();

        self.progress(format!(
            "Downloading {} {}",
            self.display_name(),
            metadata.version
        ));
        download_to_file(
            self.transport.as_ref(),
            &url,
            archive.as_file_mut(),
            &archive_path,
            &mut |progress| self.emit(UpdateEvent::Download(*progress)),
            &self.cancel,
        )?;
        self.cancel.check()?;

        self.progress(format!(
            "Installing {} {}",
            self.display_name(),
            metadata.version
        ));
        let dest = self.install_dir();
        let kind = ArchiveInstaller::new(&dest).install(&archive_path, &artifact_name, metadata)?;

        if let Err(e) = archive.close() {
            tracing::warn!("Failed to remove {}: {}", archive_path.display(), e);
        }

        if self.reload_local().is_none() {
            tracing::warn!(
                "Installed {} but {} is missing",
                metadata.version,
                self.executable_path().display()
            );
        }

        let outcome = InstallOutcome {
            version: metadata.version.clone(),
            first_install: kind.is_first_install(),
        };
        tracing::info!("{}", outcome.message(&self.display_name()));
        self.emit(UpdateEvent::Installed(outcome.clone()));
        Ok(outcome)
    }
}

/// Temporary file suffix for an artifact, keeping its archive extension.
fn temp_suffix(artifact_name: &str) -> String {
    if let Some(kind) = ArchiveType::from_name(artifact_name) {
        return kind.extension().to_string();
    }
    Path::new(artifact_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or_else(String::new, |ext| format!(".{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_suffix() {
        assert_eq!(temp_suffix("tool-1.0.zip"), ".zip");
        assert_eq!(temp_suffix("tool-1.0.TGZ"), ".tar.gz");
        assert_eq!(temp_suffix("tool.tar.gz"), ".tar.gz");
        assert_eq!(temp_suffix("tool.pkg"), ".pkg");
        assert_eq!(temp_suffix("tool"), "");
    }

    #[test]
    fn test_decision_available() {
        assert_eq!(UpdateDecision::UpToDate.available(), None);
        let meta = BundleMetadata::new("1.0", "a.zip");
        assert_eq!(
            UpdateDecision::UpdateAvailable(meta.clone()).available(),
            Some(&meta)
        );
    }
}
