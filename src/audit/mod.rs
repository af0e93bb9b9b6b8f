//! Post-build shared library audit.
//!
//! Every regular file under the `lib`, `libcxx`, `bin` and `sbin`
//! directories of the installed variants is run through the platform's
//! link inspection tool, and every reported line is checked against a
//! [`LibraryAllowlist`]. The whole tree is scanned before the result is
//! reported, so one pass surfaces every offending file.

pub mod allowlist;
pub mod inspect;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::core::BuildVariant;
use crate::util::layout::FileSystemLayout;

pub use allowlist::LibraryAllowlist;
pub use inspect::{inspector_for, Inspection, LddInspector, LinkInspector, OtoolInspector};

/// Installed subdirectories holding binaries and libraries.
const SCANNED_DIRS: &[&str] = &["lib", "libcxx", "bin", "sbin"];

/// A file that failed the audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditFailure {
    pub path: PathBuf,

    /// Inspection lines matching no allowed pattern
    pub bad_lines: Vec<String>,

    /// Set when the inspection tool itself failed
    pub tool_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    pub files_checked: usize,
    pub failures: Vec<AuditFailure>,
}

impl AuditReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Auditor<'a> {
    layout: &'a FileSystemLayout,
    inspector: &'a dyn LinkInspector,
    allowlist: LibraryAllowlist,
}

impl<'a> Auditor<'a> {
    pub fn new(
        layout: &'a FileSystemLayout,
        inspector: &'a dyn LinkInspector,
        allowlist: LibraryAllowlist,
    ) -> Self {
        Auditor {
            layout,
            inspector,
            allowlist,
        }
    }

    /// Regular files to inspect across the installed prefixes of
    /// `variants`. Symlinks are skipped.
    pub fn candidate_files(&self, variants: &[BuildVariant]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for &variant in variants {
            let prefix = self.layout.prefix(variant);
            if !prefix.is_dir() {
                tracing::info!("Directory {} does not exist, skipping", prefix.display());
                continue;
            }
            for dir in SCANNED_DIRS {
                let dir = prefix.join(dir);
                if !dir.is_dir() {
                    continue;
                }
                for entry in WalkDir::new(&dir).follow_links(false) {
                    let entry = entry
                        .with_context(|| format!("failed to walk {}", dir.display()))?;
                    if entry.file_type().is_file() {
                        files.push(entry.into_path());
                    }
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Inspect every candidate file in parallel.
    pub fn run(&self, variants: &[BuildVariant]) -> Result<AuditReport> {
        tracing::info!("Scanning installed executables and libraries...");
        let files = self.candidate_files(variants)?;

        let results: Vec<Result<Option<AuditFailure>>> =
            files.par_iter().map(|file| self.check_file(file)).collect();

        let mut failures = Vec::new();
        for result in results {
            if let Some(failure) = result? {
                failures.push(failure);
            }
        }

        if failures.is_empty() {
            tracing::info!("No problems found with library dependencies.");
        } else {
            tracing::error!(
                "Found problematic library dependencies in {} files, using tool: {}",
                failures.len(),
                self.inspector.tool()
            );
        }
        Ok(AuditReport {
            files_checked: files.len(),
            failures,
        })
    }

    fn check_file(&self, path: &Path) -> Result<Option<AuditFailure>> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match self.inspector.inspect(path)? {
            Inspection::NotAnObject => Ok(None),
            Inspection::ToolFailed { code, output } => {
                tracing::error!(
                    "Unexpected exit code {:?} from {}, file {}",
                    code,
                    self.inspector.tool(),
                    path.display()
                );
                Ok(Some(AuditFailure {
                    path: path.to_path_buf(),
                    bad_lines: Vec::new(),
                    tool_error: Some(output),
                }))
            }
            Inspection::Output(output) => {
                let bad_lines = self.allowlist.bad_lines(&file_name, &output);
                if bad_lines.is_empty() {
                    return Ok(None);
                }
                tracing::error!("{}:", path.display());
                for line in &bad_lines {
                    tracing::error!("Bad path: {}", line);
                }
                Ok(Some(AuditFailure {
                    path: path.to_path_buf(),
                    bad_lines: bad_lines.into_iter().map(str::to_string).collect(),
                    tool_error: None,
                }))
            }
        }
    }
}
