//! Build stamps: deciding whether a dependency needs a rebuild.
//!
//! A stamp fingerprints the version-control state of the files that define
//! how a dependency is built: its descriptor plus the shared driver files.
//! It records the last commit touching them and hashes of their unstaged
//! and staged diffs, so editing a descriptor forces a rebuild even before
//! the edit is committed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git2::{DiffFormat, DiffOptions, Oid, Repository};
use thiserror::Error;

use crate::core::{BuildVariant, DependencyDescriptor};
use crate::util::config::CONFIG_FILE_NAME;
use crate::util::fs::{ensure_dir, write_string};
use crate::util::hash::sha256_bytes;
use crate::util::layout::FileSystemLayout;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StampError {
    #[error("file tracked by the build stamp of `{dependency}` does not exist: {}", path.display())]
    TrackedFileMissing { dependency: String, path: PathBuf },

    #[error("not inside a git repository: {}", .0.display())]
    NotARepository(PathBuf),
}

/// Computes, compares and persists build stamps.
pub struct StampEngine {
    layout: FileSystemLayout,
    driver_files: Vec<PathBuf>,
}

impl StampEngine {
    /// `driver_files` are relative to the third-party root unless absolute.
    /// The root's `thirdparty.toml` is always tracked when it exists.
    pub fn new(layout: FileSystemLayout, driver_files: &[PathBuf]) -> Self {
        let mut driver_files: Vec<PathBuf> = driver_files
            .iter()
            .map(|path| layout.root().join(path))
            .collect();
        let config_file = layout.root().join(CONFIG_FILE_NAME);
        if config_file.is_file() && !driver_files.contains(&config_file) {
            driver_files.push(config_file);
        }
        StampEngine {
            layout,
            driver_files,
        }
    }

    /// Files whose history and diffs make up the stamp of `dep`.
    pub fn tracked_files(&self, dep: &DependencyDescriptor) -> Result<Vec<PathBuf>, StampError> {
        let mut files = vec![self.layout.definition_file(&dep.name)];
        files.extend(self.driver_files.iter().cloned());
        for path in &files {
            if !path.exists() {
                return Err(StampError::TrackedFileMissing {
                    dependency: dep.name.clone(),
                    path: path.clone(),
                });
            }
        }
        Ok(files)
    }

    /// Compute the current stamp of `dep`.
    pub fn compute(&self, dep: &DependencyDescriptor) -> Result<String> {
        let tracked = self.tracked_files(dep)?;

        let repo = Repository::discover(self.layout.root())
            .map_err(|_| StampError::NotARepository(self.layout.root().to_path_buf()))?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| StampError::NotARepository(self.layout.root().to_path_buf()))?
            .canonicalize()
            .context("failed to resolve the repository working directory")?;

        let pathspecs = tracked
            .iter()
            .map(|path| {
                let path = path
                    .canonicalize()
                    .with_context(|| format!("failed to resolve {}", path.display()))?;
                path.strip_prefix(&workdir)
                    .map(Path::to_path_buf)
                    .with_context(|| {
                        format!(
                            "{} is outside the repository at {}",
                            path.display(),
                            workdir.display()
                        )
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let commit = last_commit_touching(&repo, &pathspecs)?
            .map(|oid| oid.to_string())
            .unwrap_or_default();

        let mut opts = diff_options(&pathspecs);
        let unstaged = repo
            .diff_index_to_workdir(None, Some(&mut opts))
            .context("failed to diff the working tree")?;

        let head_tree = match repo.head() {
            Ok(head) => Some(head.peel_to_tree()?),
            Err(_) => None,
        };
        let mut opts = diff_options(&pathspecs);
        let staged = repo
            .diff_tree_to_index(head_tree.as_ref(), None, Some(&mut opts))
            .context("failed to diff the index")?;

        Ok(format!(
            "git_commit_sha1={}\ngit_diff_sha256={}\ngit_diff_sha256_cached={}\n",
            commit,
            sha256_bytes(&render_patch(&unstaged)?),
            sha256_bytes(&render_patch(&staged)?),
        ))
    }

    /// Whether `dep` must be (re)built for `variant`.
    pub fn should_rebuild(&self, dep: &DependencyDescriptor, variant: BuildVariant) -> Result<bool> {
        let stamp_path = self.layout.stamp_path(variant, &dep.name);
        if !stamp_path.exists() {
            tracing::info!(
                "Rebuilding {} ({}): build stamp file {} does not exist",
                dep.name,
                variant,
                stamp_path.display()
            );
            return Ok(true);
        }

        let source_dir = self.layout.source_dir(dep);
        if !source_dir.exists() {
            tracing::info!(
                "Rebuilding {} ({}): source directory {} does not exist",
                dep.name,
                variant,
                source_dir.display()
            );
            return Ok(true);
        }

        let old = std::fs::read_to_string(&stamp_path)
            .with_context(|| format!("failed to read build stamp: {}", stamp_path.display()))?;
        let new = self.compute(dep)?;
        if old == new {
            return Ok(false);
        }

        tracing::info!("Rebuilding {} ({}): build stamp changed", dep.name, variant);
        tracing::info!("Old build stamp:\n{}", old.trim_end());
        tracing::info!("New build stamp:\n{}", new.trim_end());
        Ok(true)
    }

    /// Persist the current stamp after a successful build.
    pub fn commit(&self, dep: &DependencyDescriptor, variant: BuildVariant) -> Result<()> {
        let stamp = self.compute(dep)?;
        let stamp_path = self.layout.stamp_path(variant, &dep.name);
        ensure_dir(&self.layout.build_dir(variant))?;
        tracing::debug!("Saving build stamp to {}", stamp_path.display());
        write_string(&stamp_path, &stamp)
    }
}

fn diff_options(pathspecs: &[PathBuf]) -> DiffOptions {
    let mut opts = DiffOptions::new();
    opts.disable_pathspec_match(true);
    for path in pathspecs {
        opts.pathspec(path.as_path());
    }
    opts
}

fn render_patch(diff: &git2::Diff<'_>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            out.push(line.origin() as u8);
        }
        out.extend_from_slice(line.content());
        true
    })
    .context("failed to render diff")?;
    Ok(out)
}

/// Most recent commit reachable from `HEAD` that changed any of `paths`.
fn last_commit_touching(repo: &Repository, paths: &[PathBuf]) -> Result<Option<Oid>> {
    if repo.head().is_err() {
        return Ok(None);
    }

    let mut walk = repo.revwalk()?;
    walk.push_head()?;
    walk.set_sorting(git2::Sort::TIME | git2::Sort::TOPOLOGICAL)?;

    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        let tree = commit.tree()?;
        let parent_tree = match commit.parents().next() {
            Some(parent) => Some(parent.tree()?),
            None => None,
        };

        let touched = paths.iter().any(|path| {
            let current = tree.get_path(path).ok().map(|entry| entry.id());
            let previous = parent_tree
                .as_ref()
                .and_then(|t| t.get_path(path).ok())
                .map(|entry| entry.id());
            current != previous
        });
        if touched {
            return Ok(Some(commit.id()));
        }
    }
    Ok(None)
}
