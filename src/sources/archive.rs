//! Archive extraction into a single source directory.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use thiserror::Error;

use crate::core::dependency::ARCHIVE_EXTENSIONS;
use crate::util::fs::ensure_dir;
use crate::util::process::ProcessBuilder;

/// Archive format errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    #[error("unknown archive type for {}", archive.display())]
    UnsupportedType { archive: PathBuf },

    #[error(
        "expected the extracted archive {} to contain exactly one subdirectory and no files, found: [{}]",
        archive.display(),
        entries.join(", ")
    )]
    UnexpectedLayout {
        archive: PathBuf,
        entries: Vec<String>,
    },

    #[error("this is a file, expected it to be a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error("just-generated unique directory name already exists in {}", dir.display())]
    TempDirCollision { dir: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    TarGz,
    Tar,
    Zip,
    /// Compressions only the system `tar` is trusted to handle.
    ExternalTar,
}

fn detect_format(archive: &Path) -> Result<Format, ArchiveError> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = ARCHIVE_EXTENSIONS
        .iter()
        .find(|ext| name.ends_with(*ext))
        .ok_or_else(|| ArchiveError::UnsupportedType {
            archive: archive.to_path_buf(),
        })?;
    Ok(match *ext {
        ".tar.gz" | ".tgz" => Format::TarGz,
        ".tar" => Format::Tar,
        ".zip" => Format::Zip,
        _ => Format::ExternalTar,
    })
}

/// Extract `archive` into `out_dir`.
///
/// The archive must unpack into exactly one top-level directory (dot files
/// aside). That directory ends up at `out_dir/<out_name>`, or under its own
/// name when `out_name` is `None`. An existing destination is left alone.
/// Returns the destination path.
pub fn extract_archive(archive: &Path, out_dir: &Path, out_name: Option<&str>) -> Result<PathBuf> {
    let archive_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(name) = out_name {
        let dest = out_dir.join(name);
        if dest.exists() {
            tracing::info!(
                "Directory already exists: {}, skipping extracting {}",
                dest.display(),
                archive_name
            );
            return Ok(dest);
        }
    }

    let format = detect_format(archive)?;
    ensure_dir(out_dir)?;

    let prefix = format!(
        "tmp-extract-{}-{}-",
        archive_name,
        chrono::Local::now().format("%Y-%m-%dT%H_%M_%S")
    );
    let tmp = tempfile::Builder::new()
        .prefix(&prefix)
        .rand_bytes(9)
        .tempdir_in(out_dir)
        .map_err(|e| -> anyhow::Error {
            if e.kind() == io::ErrorKind::AlreadyExists {
                ArchiveError::TempDirCollision {
                    dir: out_dir.to_path_buf(),
                }
                .into()
            } else {
                anyhow::Error::new(e).context(format!(
                    "failed to create temporary directory in {}",
                    out_dir.display()
                ))
            }
        })?;

    tracing::info!(
        "Extracting {} in temporary directory {}",
        archive.display(),
        tmp.path().display()
    );
    let result = unpack(archive, format, tmp.path())
        .and_then(|()| relocate(archive, tmp.path(), out_dir, out_name));

    tracing::debug!("Removing temporary directory: {}", tmp.path().display());
    tmp.close()
        .with_context(|| format!("failed to remove temporary directory in {}", out_dir.display()))?;
    result
}

fn unpack(archive: &Path, format: Format, into: &Path) -> Result<()> {
    let open = || {
        File::open(archive)
            .map(BufReader::new)
            .with_context(|| format!("failed to open archive: {}", archive.display()))
    };

    match format {
        Format::TarGz => tar::Archive::new(GzDecoder::new(open()?))
            .unpack(into)
            .with_context(|| format!("failed to extract {}", archive.display())),
        Format::Tar => tar::Archive::new(open()?)
            .unpack(into)
            .with_context(|| format!("failed to extract {}", archive.display())),
        Format::Zip => {
            let mut zip = zip::ZipArchive::new(open()?)
                .with_context(|| format!("failed to read zip archive: {}", archive.display()))?;
            zip.extract(into)
                .with_context(|| format!("failed to extract {}", archive.display()))
        }
        Format::ExternalTar => {
            let archive = archive
                .canonicalize()
                .with_context(|| format!("archive not found: {}", archive.display()))?;
            ProcessBuilder::new("tar")
                .arg("xf")
                .arg(&archive)
                .cwd(into)
                .exec_and_check()
                .map(|_| ())
        }
    }
}

fn relocate(archive: &Path, tmp: &Path, out_dir: &Path, out_name: Option<&str>) -> Result<PathBuf> {
    let mut entries: Vec<String> = std::fs::read_dir(tmp)
        .with_context(|| format!("failed to read {}", tmp.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    entries.sort();

    if entries.len() != 1 {
        return Err(ArchiveError::UnexpectedLayout {
            archive: archive.to_path_buf(),
            entries,
        }
        .into());
    }

    let extracted = tmp.join(&entries[0]);
    if !extracted.is_dir() {
        return Err(ArchiveError::NotADirectory { path: extracted }.into());
    }

    let dest = out_dir.join(out_name.unwrap_or(&entries[0]));
    if dest.exists() {
        tracing::info!(
            "Directory already exists: {}, skipping extracting {}",
            dest.display(),
            archive.display()
        );
        return Ok(dest);
    }

    tracing::info!("Moving {} to {}", extracted.display(), dest.display());
    std::fs::rename(&extracted, &dest).with_context(|| {
        format!(
            "failed to move {} to {}",
            extracted.display(),
            dest.display()
        )
    })?;
    Ok(dest)
}
