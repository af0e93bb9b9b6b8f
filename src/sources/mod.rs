//! Source acquisition.
//!
//! Archives are downloaded through a [`download::Downloader`], verified
//! against the [`checksum::ChecksumRegistry`], extracted and patched by the
//! [`fetch::FetchPipeline`].

pub mod archive;
pub mod checksum;
pub mod download;
pub mod fetch;

use thiserror::Error;

pub use archive::{extract_archive, ArchiveError};
pub use checksum::{ChecksumError, ChecksumRegistry};
pub use download::{DownloadManager, Downloader, HttpDownloader};
pub use fetch::FetchPipeline;

/// Failures of the fetch pipeline that are not integrity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("failed to download {url} after {attempts} attempts")]
    DownloadExhausted { url: String, attempts: u32 },

    #[error("patch {patch} failed for {dependency}")]
    PatchFailed { dependency: String, patch: String },
}
