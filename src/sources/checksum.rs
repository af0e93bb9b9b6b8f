//! Checksum manifest of downloaded archives.
//!
//! The manifest is a plain text file with one `<sha256>  <file name>` line
//! per archive. Blank lines and `#` comments are ignored. Entries are only
//! ever appended, never rewritten.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::util::hash::is_sha256_hex;

/// Integrity errors around the checksum manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumError {
    #[error("checksum file not found at {}", path.display())]
    ManifestMissing { path: PathBuf },

    #[error("{}:{line_no}: expected `<sha256> <file name>`, found `{line}`", path.display())]
    Malformed {
        path: PathBuf,
        line_no: usize,
        line: String,
    },

    #[error(
        "{}:{line_no}: invalid checksum `{checksum}` for `{file_name}`; expected a SHA-256 sum (64 lowercase hex characters)",
        path.display()
    )]
    InvalidChecksum {
        path: PathBuf,
        line_no: usize,
        file_name: String,
        checksum: String,
    },

    #[error("conflicting checksums for `{file_name}`: {existing} and {new}")]
    Conflict {
        file_name: String,
        existing: String,
        new: String,
    },

    #[error("no expected checksum provided for `{file_name}` (use --add_checksum to record it)")]
    Missing { file_name: String },

    #[error("file {} has wrong checksum after downloading from {url}: has {actual}, expected {expected}", path.display())]
    Mismatch {
        path: PathBuf,
        url: String,
        expected: String,
        actual: String,
    },
}

/// Mapping from archive file name to its expected SHA-256.
#[derive(Debug)]
pub struct ChecksumRegistry {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl ChecksumRegistry {
    /// Load the manifest. A missing manifest is only acceptable when
    /// `allow_missing` is set, in which case it is created on first
    /// registration.
    pub fn load(path: &Path, allow_missing: bool) -> Result<Self> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read checksum file: {}", path.display()))?;
            parse_manifest(path, &contents)?
        } else if allow_missing {
            tracing::warn!(
                "Checksum file {} does not exist, it will be created",
                path.display()
            );
            BTreeMap::new()
        } else {
            return Err(ChecksumError::ManifestMissing {
                path: path.to_path_buf(),
            }
            .into());
        };

        tracing::debug!("Loaded {} checksums from {}", entries.len(), path.display());
        Ok(ChecksumRegistry {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Expected checksum of an archive, if recorded.
    pub fn expected(&self, file_name: &str) -> Option<String> {
        self.lock().get(file_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record a newly observed checksum and durably append it to the
    /// manifest. Re-registering the same value is a no-op.
    pub fn register(&self, file_name: &str, checksum: &str) -> Result<()> {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(file_name) {
            if existing == checksum {
                return Ok(());
            }
            return Err(ChecksumError::Conflict {
                file_name: file_name.to_string(),
                existing: existing.clone(),
                new: checksum.to_string(),
            }
            .into());
        }
        if !is_sha256_hex(checksum) {
            return Err(ChecksumError::InvalidChecksum {
                path: self.path.clone(),
                line_no: 0,
                file_name: file_name.to_string(),
                checksum: checksum.to_string(),
            }
            .into());
        }

        let needs_newline = std::fs::read(&self.path)
            .map(|bytes| bytes.last().is_some_and(|b| *b != b'\n'))
            .unwrap_or(false);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open checksum file: {}", self.path.display()))?;
        if needs_newline {
            writeln!(file)?;
        }
        writeln!(file, "{}  {}", checksum, file_name)
            .with_context(|| format!("failed to write checksum file: {}", self.path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync checksum file: {}", self.path.display()))?;

        entries.insert(file_name.to_string(), checksum.to_string());
        tracing::info!(
            "Added checksum for {} to {}: {}",
            file_name,
            self.path.display(),
            checksum
        );
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn parse_manifest(path: &Path, contents: &str) -> Result<BTreeMap<String, String>, ChecksumError> {
    let mut entries: BTreeMap<String, String> = BTreeMap::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let &[checksum, file_name] = fields.as_slice() else {
            return Err(ChecksumError::Malformed {
                path: path.to_path_buf(),
                line_no,
                line: line.to_string(),
            });
        };

        if !is_sha256_hex(checksum) {
            return Err(ChecksumError::InvalidChecksum {
                path: path.to_path_buf(),
                line_no,
                file_name: file_name.to_string(),
                checksum: checksum.to_string(),
            });
        }

        match entries.get(file_name) {
            Some(existing) if existing != checksum => {
                return Err(ChecksumError::Conflict {
                    file_name: file_name.to_string(),
                    existing: existing.clone(),
                    new: checksum.to_string(),
                });
            }
            _ => {
                entries.insert(file_name.to_string(), checksum.to_string());
            }
        }
    }
    Ok(entries)
}
