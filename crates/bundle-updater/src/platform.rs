//! Platform detection.
//!
//! Bundles are published per operating system under a platform tag
//! (`darwin`, `linux`, `windows`). Only 64-bit builds are published, so a
//! 32-bit host or an unknown OS is reported as unsupported and must not
//! attempt a download.

use std::fmt;
use std::sync::OnceLock;

/// Operating system families bundles are published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// macOS.
    Darwin,
    /// Linux.
    Linux,
    /// Microsoft Windows.
    Windows,
    /// Anything else.
    Unsupported,
}

impl Platform {
    /// Platform of the running host, from compile-time target information.
    #[must_use]
    pub const fn host() -> Self {
        if cfg!(target_os = "macos") {
            Self::Darwin
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Unsupported
        }
    }

    /// Tag used in remote URLs.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Darwin => "darwin",
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Unsupported => "unsupported",
        }
    }

    /// Suffix appended to executable file names.
    #[must_use]
    pub const fn exe_suffix(&self) -> &'static str {
        match self {
            Self::Windows => ".exe",
            _ => "",
        }
    }

    /// Get a human-readable name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Darwin => "macOS",
            Self::Linux => "Linux",
            Self::Windows => "Windows",
            Self::Unsupported => "Unsupported platform",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Platform capability injected into locations and the coordinator.
pub trait PlatformInfo: Send + Sync {
    /// Platform the bundle is selected for.
    fn platform(&self) -> Platform;

    /// Whether bundles can be installed on this host.
    fn is_supported(&self) -> bool;
}

/// The running host. Detection runs once and is cached for the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostPlatform;

#[derive(Debug, Clone, Copy)]
struct Detected {
    platform: Platform,
    supported: bool,
}

fn detect() -> Detected {
    static DETECTED: OnceLock<Detected> = OnceLock::new();
    *DETECTED.get_or_init(|| {
        let platform = Platform::host();
        let arch = std::env::consts::ARCH;
        let supported =
            platform != Platform::Unsupported && matches!(arch, "x86_64" | "aarch64");
        tracing::debug!(
            "Detected platform {} ({}), supported: {}",
            platform,
            arch,
            supported
        );
        Detected {
            platform,
            supported,
        }
    })
}

impl PlatformInfo for HostPlatform {
    fn platform(&self) -> Platform {
        detect().platform
    }

    fn is_supported(&self) -> bool {
        detect().supported
    }
}

/// A platform fixed at construction, for overrides and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPlatform {
    platform: Platform,
    supported: bool,
}

impl FixedPlatform {
    /// A supported platform, unless it is [`Platform::Unsupported`].
    #[must_use]
    pub const fn new(platform: Platform) -> Self {
        Self {
            platform,
            supported: !matches!(platform, Platform::Unsupported),
        }
    }

    /// Override the support flag.
    #[must_use]
    pub const fn with_supported(mut self, supported: bool) -> Self {
        self.supported = supported;
        self
    }
}

impl PlatformInfo for FixedPlatform {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn is_supported(&self) -> bool {
        self.supported
    }
}
