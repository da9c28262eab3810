//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};

use bundle_updater::{
    BundleMetadata, CancelToken, DownloadProgress, FixedPlatform, LocalBundle, Phase,
    Platform, RemoteBundle, Result, Transport, UpdateCoordinator, UpdateError, UpdateEvent,
    UpdateListener,
};
use reqwest::Url;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

pub const BASE_URL: &str = "https://bundles.example.com/tool/";
pub const META_URL: &str = "https://bundles.example.com/tool/linux/64bit/meta.json";

/// Artifact URL for `dist` published for plugin version 0.9.
pub fn artifact_url(dist: &str) -> String {
    format!("{BASE_URL}linux/64bit/0.9/{dist}")
}

/// Build a ZIP archive in memory.
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default().unix_permissions(0o755))
            .unwrap();
        writer.write_all(data.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A bundle archive wrapped in a single top-level directory.
pub fn bundle_zip(version: &str) -> Vec<u8> {
    zip_bytes(&[
        (&format!("tool-{version}/tool"), &format!("tool {version}")),
        (&format!("tool-{version}/lib/data.txt"), "data"),
    ])
}

/// Metadata document published for `version`.
pub fn meta_json(version: &str, dist: &str) -> String {
    format!(
        r#"{{"version": "{version}", "dist": "{dist}", "pluginVersion": "0.9", "changes": ["Release {version}"]}}"#
    )
}

/// Pauses a download until the test releases it.
pub struct Gate {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

/// Test side of a [`Gate`].
pub struct GateControl {
    entered: Receiver<()>,
    release: Sender<()>,
}

impl GateControl {
    /// Block until a download reaches the gate.
    pub fn wait_entered(&self) {
        self.entered.recv().unwrap();
    }

    /// Let the paused download continue.
    pub fn release(&self) {
        self.release.send(()).unwrap();
    }
}

pub fn gate() -> (Gate, GateControl) {
    let (entered_tx, entered_rx) = channel();
    let (release_tx, release_rx) = channel();
    (
        Gate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        },
        GateControl {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

/// In-memory transport serving fixed bodies by URL.
#[derive(Default)]
pub struct FakeTransport {
    files: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    gate: Option<Gate>,
    gate_url: Option<String>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.files.lock().unwrap().insert(url.to_string(), body.into());
        self
    }

    pub fn replace(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.files.lock().unwrap().insert(url.to_string(), body.into());
    }

    /// Pause downloads of `url` halfway through at `gate`.
    pub fn gated(mut self, url: &str, gate: Gate) -> Self {
        self.gate = Some(gate);
        self.gate_url = Some(url.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn download(
        &self,
        url: &Url,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(&DownloadProgress),
        cancel: &CancelToken,
        phase: Phase,
    ) -> Result<u64> {
        self.requests.lock().unwrap().push(url.to_string());
        let body = self
            .files
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| UpdateError::Network {
                phase,
                url: url.to_string(),
                message: "server responded with status 404 Not Found".to_string(),
            })?;

        let total = body.len() as u64;
        let (first, rest) = body.split_at(body.len() / 2);
        let write = |sink: &mut dyn Write, chunk: &[u8]| {
            sink.write_all(chunk)
                .map_err(|e| UpdateError::fs(phase, "write", PathBuf::new(), e))
        };

        cancel.check()?;
        write(sink, first)?;
        progress(&DownloadProgress {
            downloaded: first.len() as u64,
            total,
            speed: 0,
        });

        if let (Some(gate), Some(gate_url)) = (&self.gate, &self.gate_url) {
            if gate_url == url.as_str() {
                gate.entered.lock().unwrap().send(()).unwrap();
                gate.release.lock().unwrap().recv().unwrap();
            }
        }

        cancel.check()?;
        write(sink, rest)?;
        progress(&DownloadProgress {
            downloaded: total,
            total,
            speed: 0,
        });
        Ok(total)
    }
}

/// Listener recording every event.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<UpdateEvent>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<UpdateEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn busy_changes(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UpdateEvent::BusyChanged(busy) => Some(busy),
                _ => None,
            })
            .collect()
    }
}

impl UpdateListener for Recorder {
    fn on_event(&self, event: &UpdateEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A coordinator over a temporary install root.
pub struct Harness {
    pub root: TempDir,
    pub coordinator: Arc<UpdateCoordinator>,
    pub transport: Arc<FakeTransport>,
    pub recorder: Arc<Recorder>,
}

impl Harness {
    pub fn new(transport: FakeTransport) -> Self {
        Self::with_platform(transport, FixedPlatform::new(Platform::Linux))
    }

    pub fn with_platform(transport: FakeTransport, platform: FixedPlatform) -> Self {
        let root = tempfile::tempdir().unwrap();
        let platform = Arc::new(platform);
        let transport = Arc::new(transport);
        let recorder = Arc::new(Recorder::default());

        let local = LocalBundle::new(root.path(), "tool", "Tool", platform.as_ref());
        let remote = RemoteBundle::new(BASE_URL, "Tool", platform.as_ref()).unwrap();
        let coordinator = Arc::new(UpdateCoordinator::new(
            local,
            remote,
            platform,
            transport.clone(),
            recorder.clone(),
        ));

        Self {
            root,
            coordinator,
            transport,
            recorder,
        }
    }

    pub fn install_dir(&self) -> PathBuf {
        self.root.path().join("tool-pkg")
    }

    pub fn sibling(&self, suffix: &str) -> PathBuf {
        self.root.path().join(format!("tool-pkg{suffix}"))
    }

    pub fn installed_text(&self, relative: &str) -> String {
        std::fs::read_to_string(self.install_dir().join(relative)).unwrap()
    }
}

/// Metadata for `version` with a relative distribution reference.
pub fn metadata(version: &str, dist: &str) -> BundleMetadata {
    let mut meta = BundleMetadata::new(version, dist);
    meta.plugin_version = "0.9".to_string();
    meta
}
