//! Test utilities and fakes for unit tests.
//!
//! The orchestrator talks to the outside world through three seams: the
//! [`Downloader`], the [`CommandRunner`] and the [`LinkInspector`]. This
//! module provides in-memory implementations of each so tests can drive
//! whole pipelines without network access, compilers or `ldd`.
//!
//! # Example
//!
//! ```rust,ignore
//! use crate::test_support::{FakeDownloader, RecordingRunner};
//!
//! let fake = FakeDownloader::new().serve("https://example.com/a.tar.gz", b"bytes");
//! let runner = RecordingRunner::new().fail_on("patch");
//! ```

pub mod fixtures;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};

use crate::audit::{Inspection, LinkInspector};
use crate::sources::Downloader;
use crate::util::process::{CommandRunner, ProcessBuilder};

// Re-export fixtures for convenience
pub use fixtures::*;

/// Serves canned bytes per URL, optionally failing the first attempts.
#[derive(Debug, Default)]
pub struct FakeDownloader {
    responses: HashMap<String, Vec<u8>>,
    failures: Mutex<HashMap<String, u32>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests for `url` with `body`.
    pub fn serve(mut self, url: &str, body: &[u8]) -> Self {
        self.responses.insert(url.to_string(), body.to_vec());
        self
    }

    /// Fail the first `count` requests for `url`.
    pub fn fail_first(self, url: &str, count: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), count);
        self
    }

    /// Number of requests made for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl Downloader for FakeDownloader {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;

        if let Some(remaining) = self.failures.lock().unwrap().get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                bail!("simulated failure fetching {url}");
            }
        }

        let body = self
            .responses
            .get(url)
            .ok_or_else(|| anyhow!("404 Not Found: {url}"))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, body)?;
        Ok(())
    }
}

/// A command as seen by [`RecordingRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub stdin: Option<Vec<u8>>,
    pub env: BTreeMap<String, String>,
}

/// Records every command instead of running it.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<RecordedCommand>>,
    fail_on: Vec<String>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report failure for every command whose program is `program`.
    pub fn fail_on(mut self, program: &str) -> Self {
        self.fail_on.push(program.to_string());
        self
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Recorded command lines, program first.
    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.commands()
            .into_iter()
            .map(|cmd| {
                let mut argv = vec![cmd.program];
                argv.extend(cmd.args);
                argv
            })
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, cmd: &ProcessBuilder) -> Result<()> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        self.commands.lock().unwrap().push(RecordedCommand {
            program: program.clone(),
            args: cmd.get_args().to_vec(),
            cwd: cmd.get_cwd().map(Path::to_path_buf),
            stdin: cmd.get_stdin().map(<[u8]>::to_vec),
            env: cmd.get_envs().clone(),
        });

        if self.fail_on.contains(&program) {
            bail!(
                "process didn't exit successfully: `{}` (exit status: 1)",
                cmd.display_command()
            );
        }
        Ok(())
    }
}

/// Link inspector with canned answers per file. Files without an answer
/// are reported as not being object files.
#[derive(Debug, Default)]
pub struct CannedInspector {
    responses: HashMap<PathBuf, Inspection>,
}

impl CannedInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, path: &Path, inspection: Inspection) -> Self {
        self.responses.insert(path.to_path_buf(), inspection);
        self
    }
}

impl LinkInspector for CannedInspector {
    fn tool(&self) -> &'static str {
        "canned"
    }

    fn inspect(&self, file: &Path) -> Result<Inspection> {
        Ok(self
            .responses
            .get(file)
            .cloned()
            .unwrap_or(Inspection::NotAnObject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_downloader_failures_then_success() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dest = tmp.path().join("d/a.tar.gz");
        let fake = FakeDownloader::new()
            .serve("https://x/a.tar.gz", b"abc")
            .fail_first("https://x/a.tar.gz", 1);

        assert!(fake.fetch("https://x/a.tar.gz", &dest).is_err());
        fake.fetch("https://x/a.tar.gz", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"abc");
        assert_eq!(fake.calls("https://x/a.tar.gz"), 2);
        assert!(fake.fetch("https://x/other", &dest).is_err());
    }

    #[test]
    fn test_recording_runner() {
        let runner = RecordingRunner::new().fail_on("patch");
        runner
            .run(&ProcessBuilder::new("make").arg("-j4").cwd("/tmp"))
            .unwrap();
        assert!(runner.run(&ProcessBuilder::new("patch").arg("-p1")).is_err());

        assert_eq!(runner.argvs(), [vec!["make", "-j4"], vec!["patch", "-p1"]]);
        assert_eq!(runner.commands()[0].cwd.as_deref(), Some(Path::new("/tmp")));
    }
}
