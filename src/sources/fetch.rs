//! The fetch, verify, extract and patch pipeline for one dependency.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::dependency::{CommandLine, DependencyDescriptor};
use crate::sources::archive::extract_archive;
use crate::sources::download::DownloadManager;
use crate::sources::FetchError;
use crate::util::fs::{ensure_dir, remove_path, write_string};
use crate::util::layout::FileSystemLayout;
use crate::util::process::{CommandRunner, ProcessBuilder};

/// Prepares patched source trees under `src/`.
///
/// Idempotent: a tree whose `patchlevel-<n>` marker exists is left alone,
/// anything else is wiped and rebuilt from the archive.
pub struct FetchPipeline<'a> {
    layout: &'a FileSystemLayout,
    downloads: &'a DownloadManager<'a>,
    runner: &'a dyn CommandRunner,
}

impl<'a> FetchPipeline<'a> {
    pub fn new(
        layout: &'a FileSystemLayout,
        downloads: &'a DownloadManager<'a>,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        FetchPipeline {
            layout,
            downloads,
            runner,
        }
    }

    /// Make sure the dependency's source tree is present and patched.
    /// Returns the source directory.
    pub fn ensure_fetched(&self, dep: &DependencyDescriptor) -> Result<PathBuf> {
        let src_dir = self.layout.source_dir(dep);
        let marker = src_dir.join(dep.patch_level_marker());
        if marker.exists() {
            tracing::debug!("{} is already fetched and patched", dep.name);
            return Ok(src_dir);
        }

        remove_path(&src_dir)?;

        if dep.is_mkdir() {
            tracing::info!("Creating {}", src_dir.display());
            ensure_dir(&src_dir)?;
        } else {
            let archive = self.layout.archive_path(dep)?;
            self.downloads
                .download_verified(&dep.download_url(), &archive)?;
            let dir_name = dep.dir_name();
            extract_archive(&archive, &self.layout.src_dir(), Some(&dir_name))?;
        }

        for extra in &dep.extra_downloads {
            let archive_name = extra.archive_name()?;
            let archive = self.layout.download_dir().join(&archive_name);
            let url = extra.download_url();
            tracing::info!("Downloading {} from {}", archive_name, url);
            self.downloads.download_verified(&url, &archive)?;

            let output_dir = src_dir.join(&extra.dir_name);
            extract_archive(&archive, &output_dir, None)?;
            self.run_all(&dep.name, &extra.post_exec, &output_dir)?;
        }

        for patch in &dep.patches {
            self.apply_patch(dep, patch, &src_dir)?;
        }
        self.run_all(&dep.name, &dep.post_patch, &src_dir)?;

        write_string(&marker, "")?;
        Ok(src_dir)
    }

    fn apply_patch(&self, dep: &DependencyDescriptor, patch: &str, src_dir: &Path) -> Result<()> {
        let patch_path = self.layout.patches_dir().join(patch);
        let contents = std::fs::read(&patch_path)
            .with_context(|| format!("failed to read patch: {}", patch_path.display()))?;

        tracing::info!("Applying patch: {}", patch);
        let cmd = ProcessBuilder::new("patch")
            .arg(format!("-p{}", dep.patch_strip))
            .stdin(contents)
            .cwd(src_dir)
            .log_prefix(&dep.name);
        self.runner.run(&cmd).map_err(|e| {
            e.context(FetchError::PatchFailed {
                dependency: dep.name.clone(),
                patch: patch.to_string(),
            })
        })
    }

    fn run_all(&self, name: &str, commands: &[CommandLine], cwd: &Path) -> Result<()> {
        for argv in commands {
            let cmd = ProcessBuilder::from_argv(argv)?.cwd(cwd).log_prefix(name);
            self.runner.run(&cmd)?;
        }
        Ok(())
    }
}
