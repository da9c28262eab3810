//! Published bundle releases.
//!
//! The server layout is:
//!
//! ```text
//! <base_url>/<platform>/<arch>/meta.json
//! <base_url>/<platform>/<arch>/<pluginVersion>/<dist>
//! ```

use std::sync::Arc;

use reqwest::Url;

use super::BundleLocation;
use crate::error::{Result, UpdateError};
use crate::metadata::BundleMetadata;
use crate::platform::{Platform, PlatformInfo};

/// Architecture directory used when none is configured.
pub const DEFAULT_ARCH: &str = "64bit";

/// File name of the remote metadata document.
pub const META_FILE_NAME: &str = "meta.json";

/// Default S3 endpoint for [`RemoteBundle::s3`].
pub const S3_DEFAULT_URL: &str = "https://s3.amazonaws.com/";

const ENV_S3_URL: &str = "BUNDLE_S3_URL";
const ENV_S3_BUCKET: &str = "BUNDLE_S3_BUCKET";
const ENV_S3_FOLDER: &str = "BUNDLE_S3_FOLDER";

/// Releases published under a base URL.
#[derive(Debug, Clone)]
pub struct RemoteBundle {
    base_url: Url,
    arch: String,
    platform: Platform,
    display_name: String,
    metadata_url: Url,
    plugin_version: Option<String>,
    metadata: Option<Arc<BundleMetadata>>,
}

/// Parse a base URL. The path always ends with `/` so relative joins keep
/// its last segment.
fn parse_base(url: &str) -> Result<Url> {
    let mut base = Url::parse(url.trim()).map_err(|e| UpdateError::InvalidBaseUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    if base.cannot_be_a_base() {
        return Err(UpdateError::InvalidBaseUrl {
            url: url.to_string(),
            message: "not a hierarchical URL".to_string(),
        });
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

fn resolve_metadata_url(base: &Url, platform: Platform, arch: &str) -> Result<Url> {
    let relative = format!("{}/{}/{}", platform.tag(), arch, META_FILE_NAME);
    base.join(&relative).map_err(|e| UpdateError::InvalidBaseUrl {
        url: base.to_string(),
        message: e.to_string(),
    })
}

fn bad_reference(dist: &str, error: &dyn std::fmt::Display) -> UpdateError {
    UpdateError::InvalidMetadata(format!("bad distribution reference {dist}: {error}"))
}

impl RemoteBundle {
    /// Releases under `base_url`. A missing trailing `/` is added.
    pub fn new(
        base_url: &str,
        display_name: impl Into<String>,
        platform: &dyn PlatformInfo,
    ) -> Result<Self> {
        let base_url = parse_base(base_url)?;
        let platform = platform.platform();
        let metadata_url = resolve_metadata_url(&base_url, platform, DEFAULT_ARCH)?;

        Ok(Self {
            base_url,
            arch: DEFAULT_ARCH.to_string(),
            platform,
            display_name: display_name.into(),
            metadata_url,
            plugin_version: None,
            metadata: None,
        })
    }

    /// Releases in an S3 bucket, with environment overrides.
    pub fn s3(
        bucket: &str,
        folder: &str,
        display_name: impl Into<String>,
        platform: &dyn PlatformInfo,
    ) -> Result<Self> {
        let base = s3_base_url_with(|key| std::env::var(key).ok(), bucket, folder);
        Self::new(&base, display_name, platform)
    }

    /// Base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Change the base URL and recompute the metadata URL.
    pub fn set_base_url(&mut self, base_url: &str) -> Result<()> {
        let base = parse_base(base_url)?;
        self.metadata_url = resolve_metadata_url(&base, self.platform, &self.arch)?;
        self.base_url = base;
        Ok(())
    }

    /// Architecture directory.
    #[must_use]
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// Change the architecture directory and recompute the metadata URL.
    pub fn set_arch(&mut self, arch: impl Into<String>) -> Result<()> {
        let arch = arch.into();
        self.metadata_url = resolve_metadata_url(&self.base_url, self.platform, &arch)?;
        self.arch = arch;
        Ok(())
    }

    /// Platform the releases are selected for.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// URL of the metadata document.
    #[must_use]
    pub fn metadata_url(&self) -> &Url {
        &self.metadata_url
    }

    /// Host application version used when metadata does not name one.
    pub fn set_plugin_version(&mut self, plugin_version: Option<String>) {
        self.plugin_version = plugin_version.filter(|v| !v.trim().is_empty());
    }

    /// Remember the most recently fetched metadata.
    pub fn set_metadata(&mut self, metadata: Arc<BundleMetadata>) {
        self.metadata = Some(metadata);
    }

    /// URL of the distribution archive described by `metadata`.
    ///
    /// An absolute `dist` is used as is; anything else is appended to
    /// `<base_url><platform>/<arch>/<pluginVersion>/`.
    pub fn artifact_url(&self, metadata: &BundleMetadata) -> Result<Url> {
        if self.platform == Platform::Unsupported {
            return Err(UpdateError::UnsupportedPlatform(
                self.platform.display_name().to_string(),
            ));
        }

        let dist = metadata.distribution.trim();
        if dist.contains(":/") {
            return Url::parse(dist).map_err(|e| bad_reference(dist, &e));
        }

        let plugin_version = match (metadata.plugin_version.trim(), &self.plugin_version) {
            ("", Some(fallback)) => fallback.as_str(),
            (version, _) => version,
        };
        let relative = format!(
            "{}/{}/{}/{}",
            self.platform.tag(),
            self.arch,
            plugin_version,
            dist.trim_start_matches('/')
        );
        self.base_url
            .join(&relative)
            .map_err(|e| bad_reference(dist, &e))
    }
}

impl BundleLocation for RemoteBundle {
    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn metadata(&self) -> Option<Arc<BundleMetadata>> {
        self.metadata.clone()
    }
}

/// Build an S3 base URL, reading overrides through `env`.
///
/// `BUNDLE_S3_URL` replaces the endpoint unless empty; `BUNDLE_S3_BUCKET`
/// and `BUNDLE_S3_FOLDER` replace the bucket and folder. Parts are stripped
/// of surrounding slashes and skipped when empty.
pub fn s3_base_url_with(
    env: impl Fn(&str) -> Option<String>,
    bucket: &str,
    folder: &str,
) -> String {
    let endpoint = env(ENV_S3_URL)
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| S3_DEFAULT_URL.to_string());
    let bucket = env(ENV_S3_BUCKET).unwrap_or_else(|| bucket.to_string());
    let folder = env(ENV_S3_FOLDER).unwrap_or_else(|| folder.to_string());

    let mut url = endpoint.trim().trim_end_matches('/').to_string();
    for part in [bucket.as_str(), folder.as_str()] {
        let part = part.trim_matches('/');
        if !part.is_empty() {
            url.push('/');
            url.push_str(part);
        }
    }
    url.push('/');
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::FixedPlatform;
    use std::collections::HashMap;

    fn remote(base: &str) -> RemoteBundle {
        RemoteBundle::new(base, "Tool", &FixedPlatform::new(Platform::Linux)).unwrap()
    }

    #[test]
    fn test_metadata_url() {
        let r = remote("https://example.com/bundles/");
        assert_eq!(
            r.metadata_url().as_str(),
            "https://example.com/bundles/linux/64bit/meta.json"
        );
    }

    #[test]
    fn test_metadata_url_tracks_changes() {
        let mut r = remote("https://example.com/bundles/");
        r.set_arch("arm64").unwrap();
        assert_eq!(
            r.metadata_url().as_str(),
            "https://example.com/bundles/linux/arm64/meta.json"
        );

        r.set_base_url("https://mirror.example.org/").unwrap();
        assert_eq!(
            r.metadata_url().as_str(),
            "https://mirror.example.org/linux/arm64/meta.json"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = RemoteBundle::new("not a url", "Tool", &FixedPlatform::new(Platform::Linux))
            .unwrap_err();
        assert!(matches!(err, UpdateError::InvalidBaseUrl { .. }));

        let mut r = remote("https://example.com/");
        assert!(r.set_base_url("::").is_err());
        assert_eq!(r.base_url().as_str(), "https://example.com/");
    }

    #[test]
    fn test_artifact_url() {
        let r = remote("https://example.com/bundles/");
        let mut meta = BundleMetadata::new("1.2", "tool-1.2.zip");
        meta.plugin_version = "0.9".to_string();
        assert_eq!(
            r.artifact_url(&meta).unwrap().as_str(),
            "https://example.com/bundles/linux/64bit/0.9/tool-1.2.zip"
        );

        let mut r = r;
        r.set_plugin_version(Some("0.8".to_string()));
        let bare = BundleMetadata::new("1.2", "tool-1.2.zip");
        assert_eq!(
            r.artifact_url(&bare).unwrap().as_str(),
            "https://example.com/bundles/linux/64bit/0.8/tool-1.2.zip"
        );
        assert!(r.artifact_url(&meta).unwrap().as_str().contains("/0.9/"));

        let absolute = BundleMetadata::new("1.2", "https://cdn.example.net/tool.zip");
        assert_eq!(
            r.artifact_url(&absolute).unwrap().as_str(),
            "https://cdn.example.net/tool.zip"
        );
    }

    #[test]
    fn test_base_url_without_trailing_slash() {
        let mut meta = BundleMetadata::new("1.2", "tool-1.2.zip");
        meta.plugin_version = "0.9".to_string();

        for base in ["https://example.com/bundles", "https://example.com/bundles/"] {
            let r = remote(base);
            assert_eq!(r.base_url().as_str(), "https://example.com/bundles/");
            assert_eq!(
                r.metadata_url().as_str(),
                "https://example.com/bundles/linux/64bit/meta.json"
            );
            assert_eq!(
                r.artifact_url(&meta).unwrap().as_str(),
                "https://example.com/bundles/linux/64bit/0.9/tool-1.2.zip"
            );
        }

        let mut r = remote("https://example.com/");
        r.set_base_url("https://mirror.example.org/a/b").unwrap();
        assert_eq!(
            r.metadata_url().as_str(),
            "https://mirror.example.org/a/b/linux/64bit/meta.json"
        );

        let host_only = remote("https://example.com");
        assert_eq!(
            host_only.metadata_url().as_str(),
            "https://example.com/linux/64bit/meta.json"
        );
    }

    #[test]
    fn test_unsupported_platform_has_no_artifact() {
        let r = RemoteBundle::new(
            "https://example.com/",
            "Tool",
            &FixedPlatform::new(Platform::Unsupported),
        )
        .unwrap();
        assert!(r.metadata_url().as_str().contains("/unsupported/"));
        let err = r
            .artifact_url(&BundleMetadata::new("1.0", "a.zip"))
            .unwrap_err();
        assert!(matches!(err, UpdateError::UnsupportedPlatform(_)));
    }

    #[test]
    fn test_s3_base_url() {
        let none = |_: &str| None;
        assert_eq!(
            s3_base_url_with(none, "/bucket/", "tools/"),
            "https://s3.amazonaws.com/bucket/tools/"
        );
        assert_eq!(
            s3_base_url_with(none, "bucket", ""),
            "https://s3.amazonaws.com/bucket/"
        );

        let env: HashMap<&str, &str> = HashMap::from([
            ("BUNDLE_S3_URL", "http://localhost:9000"),
            ("BUNDLE_S3_FOLDER", "nightly"),
        ]);
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());
        assert_eq!(
            s3_base_url_with(lookup, "bucket", "tools"),
            "http://localhost:9000/bucket/nightly/"
        );

        let empty_url = |key: &str| (key == "BUNDLE_S3_URL").then(String::new);
        assert_eq!(
            s3_base_url_with(empty_url, "b", ""),
            "https://s3.amazonaws.com/b/"
        );
    }
}
