//! Checksum-verified archive downloads.

use std::path::Path;

use anyhow::{bail, Context, Result};
use url::Url;

use crate::sources::checksum::{ChecksumError, ChecksumRegistry};
use crate::sources::FetchError;
use crate::util::fs::{ensure_dir, remove_path};
use crate::util::hash::sha256_file;
use crate::util::retry::{retry, RetryPolicy};

/// Transport used to fetch one URL into a local file.
///
/// Implementations must not leave a partially written `dest` behind on
/// failure.
pub trait Downloader: Send + Sync {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Fetches `http(s)://` URLs with reqwest and `file://` URLs with a copy.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("thirdparty-builder/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to create HTTP client")?;
        Ok(HttpDownloader { client })
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let parent = dest
            .parent()
            .with_context(|| format!("download target has no parent: {}", dest.display()))?;
        ensure_dir(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;

        let parsed = Url::parse(url).with_context(|| format!("invalid URL: {}", url))?;
        if parsed.scheme() == "file" {
            let source = parsed
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("invalid file URL: {}", url))?;
            let mut input = std::fs::File::open(&source)
                .with_context(|| format!("failed to open {}", source.display()))?;
            std::io::copy(&mut input, &mut tmp)
                .with_context(|| format!("failed to copy {}", source.display()))?;
        } else {
            let mut response = self
                .client
                .get(parsed)
                .send()
                .with_context(|| format!("failed to download {}", url))?;

            if !response.status().is_success() {
                bail!("failed to download {}: HTTP {}", url, response.status());
            }

            response
                .copy_to(&mut tmp)
                .with_context(|| format!("failed to read response body from {}", url))?;
        }

        tmp.persist(dest)
            .with_context(|| format!("failed to move download into {}", dest.display()))?;
        Ok(())
    }
}

/// Downloads archives and verifies them against the checksum registry.
pub struct DownloadManager<'a> {
    checksums: &'a ChecksumRegistry,
    downloader: &'a dyn Downloader,
    policy: RetryPolicy,
    mirror_url_prefix: Option<String>,
    add_checksum: bool,
}

impl<'a> DownloadManager<'a> {
    pub fn new(
        checksums: &'a ChecksumRegistry,
        downloader: &'a dyn Downloader,
        policy: RetryPolicy,
    ) -> Self {
        DownloadManager {
            checksums,
            downloader,
            policy,
            mirror_url_prefix: None,
            add_checksum: false,
        }
    }

    /// Prefix the archive file name is appended to when the primary URL
    /// keeps failing.
    pub fn with_mirror(mut self, prefix: Option<String>) -> Self {
        self.mirror_url_prefix = prefix;
        self
    }

    /// Record checksums of archives the manifest does not know yet instead
    /// of failing (trust on first use).
    pub fn with_add_checksum(mut self, add_checksum: bool) -> Self {
        self.add_checksum = add_checksum;
        self
    }

    /// Make sure `path` holds the archive from `url` with the recorded
    /// checksum, downloading it when missing or corrupt.
    pub fn download_verified(&self, url: &str, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("invalid archive path: {}", path.display()))?;

        let expected = match self.checksums.expected(file_name) {
            Some(sum) => Some(sum),
            None if self.add_checksum => None,
            None => {
                return Err(ChecksumError::Missing {
                    file_name: file_name.to_string(),
                }
                .into())
            }
        };

        if path.exists() {
            let actual = sha256_file(path)?;
            match &expected {
                Some(expected) if *expected == actual => {
                    tracing::info!("No need to re-download {}: checksum already correct", file_name);
                    return Ok(());
                }
                Some(_) => {
                    tracing::info!(
                        "File {} already exists but has wrong checksum, removing",
                        path.display()
                    );
                    remove_path(path)?;
                }
                None => {
                    self.checksums.register(file_name, &actual)?;
                    return Ok(());
                }
            }
        }

        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        self.fetch_with_fallback(url, file_name, path)?;

        if !path.exists() {
            bail!("downloaded {} but unable to find {}", url, path.display());
        }

        let actual = sha256_file(path)?;
        match expected {
            Some(expected) if expected != actual => {
                remove_path(path)?;
                Err(ChecksumError::Mismatch {
                    path: path.to_path_buf(),
                    url: url.to_string(),
                    expected,
                    actual,
                }
                .into())
            }
            Some(_) => Ok(()),
            None => self.checksums.register(file_name, &actual),
        }
    }

    fn fetch_with_fallback(&self, url: &str, file_name: &str, path: &Path) -> Result<()> {
        tracing::info!("Downloading {} from {}", file_name, url);
        let primary = retry(&self.policy, &format!("downloading {}", url), |_| {
            self.downloader.fetch(url, path)
        });

        let err = match primary {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let Some(prefix) = &self.mirror_url_prefix else {
            return Err(err.context(FetchError::DownloadExhausted {
                url: url.to_string(),
                attempts: self.policy.max_attempts,
            }));
        };

        let mirror_url = format!("{}{}", prefix, file_name);
        tracing::warn!(
            "Failed to download {} from {} ({:#}), trying mirror {}",
            file_name,
            url,
            err,
            mirror_url
        );
        retry(&self.policy, &format!("downloading {}", mirror_url), |_| {
            self.downloader.fetch(&mirror_url, path)
        })
        .map_err(|err| {
            err.context(FetchError::DownloadExhausted {
                url: mirror_url.clone(),
                attempts: self.policy.max_attempts,
            })
        })
    }
}
