//! Blocking downloads with progress reporting and cooperative cancellation.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use reqwest::Url;
use reqwest::blocking::Client;

use crate::error::{Phase, Result, UpdateError};

/// User agent string for download requests.
pub const USER_AGENT: &str = concat!("bundle-updater/", env!("CARGO_PKG_VERSION"));

/// Progress update interval.
const PROGRESS_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for individual reads from the connection.
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Size of the buffer used when streaming a response body.
const CHUNK_SIZE: usize = 64 * 1024;

/// Shared cancellation flag, checked by transports between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not canceled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Check if cancellation was requested.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return [`UpdateError::Canceled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_canceled() {
            Err(UpdateError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Download progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Total bytes to download, 0 when the server did not say.
    pub total: u64,
    /// Current download speed in bytes per second (smoothed average).
    pub speed: u64,
}

impl DownloadProgress {
    /// Returns the progress as a fraction (0.0 to 1.0).
    #[must_use]
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        (self.downloaded as f64 / self.total as f64).min(1.0) as f32
    }

    /// Returns the progress as a percentage (0 to 100).
    #[must_use]
    pub fn percentage(&self) -> u8 {
        (self.fraction() * 100.0).min(100.0) as u8
    }
}

/// Download progress tracker with smoothed speed calculation.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    downloaded: u64,
    total: u64,
    // (elapsed, bytes) pairs over roughly the last two seconds
    samples: Vec<(Duration, u64)>,
    last_emit: Option<Duration>,
}

impl ProgressTracker {
    const MAX_SAMPLES: usize = 20;

    /// Start tracking a download of `total` bytes (0 if unknown).
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self {
            started: Instant::now(),
            downloaded: 0,
            total,
            samples: Vec::with_capacity(Self::MAX_SAMPLES + 1),
            last_emit: None,
        }
    }

    /// Record that `bytes` more bytes arrived.
    pub fn advance(&mut self, bytes: u64) {
        self.downloaded += bytes;
        self.samples.push((self.started.elapsed(), self.downloaded));
        if self.samples.len() > Self::MAX_SAMPLES {
            self.samples.remove(0);
        }
    }

    fn speed(&self) -> u64 {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return 0;
        };
        let elapsed = last.0.saturating_sub(first.0);
        if elapsed.is_zero() {
            return 0;
        }
        (last.1.saturating_sub(first.1) as f64 / elapsed.as_secs_f64()) as u64
    }

    /// Returns true at most once per update interval.
    pub fn should_emit(&mut self) -> bool {
        let now = self.started.elapsed();
        match self.last_emit {
            Some(last) if now.saturating_sub(last) < PROGRESS_UPDATE_INTERVAL => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// Snapshot of the current progress.
    #[must_use]
    pub fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            downloaded: self.downloaded,
            total: self.total,
            speed: self.speed(),
        }
    }
}

/// A blocking "download URL to stream" primitive.
///
/// Implementations check `cancel` between chunks and return
/// [`UpdateError::Canceled`] once it is set. Failures writing to `sink` are
/// reported as [`UpdateError::Filesystem`] with an empty path; callers that
/// know the sink's path fill it in.
pub trait Transport: Send + Sync {
    /// Stream the body at `url` into `sink`, returning the byte count.
    fn download(
        &self,
        url: &Url,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(&DownloadProgress),
        cancel: &CancelToken,
        phase: Phase,
    ) -> Result<u64>;
}

/// Download a small document into memory.
pub fn fetch_bytes(
    transport: &dyn Transport,
    url: &Url,
    cancel: &CancelToken,
    phase: Phase,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    transport.download(url, &mut body, &mut |_| {}, cancel, phase)?;
    Ok(body)
}

/// Download into an already-open file at `path`.
pub fn download_to_file(
    transport: &dyn Transport,
    url: &Url,
    file: &mut File,
    path: &Path,
    progress: &mut dyn FnMut(&DownloadProgress),
    cancel: &CancelToken,
) -> Result<u64> {
    let phase = Phase::ArtifactFetch;
    let written = transport
        .download(url, file, progress, cancel, phase)
        .map_err(|e| match e {
            UpdateError::Filesystem {
                phase,
                operation,
                path: p,
                source,
            } if p.as_os_str().is_empty() => UpdateError::fs(phase, operation, path, source),
            other => other,
        })?;
    file.flush()
        .map_err(|e| UpdateError::fs(phase, "flush", path, e))?;
    Ok(written)
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with the default timeouts and user agent.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| UpdateError::Network {
                phase: Phase::Local,
                url: String::new(),
                message: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn download(
        &self,
        url: &Url,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(&DownloadProgress),
        cancel: &CancelToken,
        phase: Phase,
    ) -> Result<u64> {
        let network = |message: String| UpdateError::Network {
            phase,
            url: url.to_string(),
            message,
        };

        cancel.check()?;
        tracing::debug!("GET {}", url);

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(network(format!("server responded with status {status}")));
        }

        let mut tracker = ProgressTracker::new(response.content_length().unwrap_or(0));
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            cancel.check()?;
            let n = match response.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(network(e.to_string())),
            };
            sink.write_all(&buf[..n])
                .map_err(|e| UpdateError::fs(phase, "write", PathBuf::new(), e))?;
            tracker.advance(n as u64);
            if tracker.should_emit() {
                progress(&tracker.progress());
            }
        }

        let done = tracker.progress();
        progress(&done);
        tracing::debug!("Downloaded {} from {}", format_bytes(done.downloaded), url);
        Ok(done.downloaded)
    }
}

/// Format bytes as a human-readable string.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Format speed as a human-readable string.
#[must_use]
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}
