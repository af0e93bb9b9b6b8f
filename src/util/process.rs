//! Subprocess execution utilities.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::thread::JoinHandle;

use anyhow::{bail, Context, Result};

type StdinFeeder = JoinHandle<std::io::Result<()>>;

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    env_remove: Vec<String>,
    cwd: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    log_prefix: Option<String>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: BTreeMap::new(),
            env_remove: Vec::new(),
            cwd: None,
            stdin: None,
            log_prefix: None,
        }
    }

    /// Build from an argv-style list (`["make", "-j8"]`).
    pub fn from_argv<S: AsRef<str>>(argv: &[S]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("empty command line");
        };
        Ok(ProcessBuilder::new(program.as_ref()).args(args.iter().map(|a| a.as_ref())))
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set several environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (k, v) in vars {
            self = self.env(k, v);
        }
        self
    }

    /// Remove an environment variable.
    pub fn env_remove(mut self, key: impl AsRef<str>) -> Self {
        self.env_remove.push(key.as_ref().to_string());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Set stdin data.
    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Prefix used when logging the child's output lines.
    pub fn log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = Some(prefix.into());
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the explicitly set environment.
    pub fn get_envs(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Get the working directory, if set.
    pub fn get_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Get the stdin payload, if any.
    pub fn get_stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        for key in &self.env_remove {
            cmd.env_remove(key);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd
    }

    fn spawn_with_stdin(&self, mut cmd: Command) -> Result<(Child, Option<StdinFeeder>)> {
        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", self.display_command()))?;

        let feeder = match (self.stdin.clone(), child.stdin.take()) {
            // Fed from a thread so a chatty child cannot deadlock on a full pipe.
            (Some(data), Some(mut stdin)) => {
                Some(std::thread::spawn(move || stdin.write_all(&data)))
            }
            _ => None,
        };
        Ok((child, feeder))
    }

    fn join_feeder(&self, feeder: Option<StdinFeeder>) {
        let Some(feeder) = feeder else {
            return;
        };
        match feeder.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(
                "failed to write stdin of `{}`: {}",
                self.display_command(),
                e
            ),
            Err(_) => tracing::debug!("stdin writer of `{}` panicked", self.display_command()),
        }
    }

    /// Execute the command and wait for completion, capturing its output.
    pub fn exec(&self) -> Result<Output> {
        let (child, feeder) = self.spawn_with_stdin(self.build_command())?;
        let output = child
            .wait_with_output()
            .with_context(|| format!("failed to wait for `{}`", self.program.display()));
        self.join_feeder(feeder);
        output
    }

    /// Execute and require success.
    pub fn exec_and_check(&self) -> Result<Output> {
        let output = self.exec()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "`{}` failed with exit code {:?}\n{}",
                self.display_command(),
                output.status.code(),
                stderr
            );
        }
        Ok(output)
    }

    /// Execute while streaming stdout and stderr to the log, one line at a
    /// time, tagged with the log prefix.
    pub fn exec_logged(&self) -> Result<ExitStatus> {
        let prefix = self.log_prefix.clone().unwrap_or_else(|| {
            self.program
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        tracing::info!(
            "[{}] Running command: {} (current directory: {})",
            prefix,
            self.display_command(),
            self.cwd
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".".to_string())
        );

        let (mut child, feeder) = self.spawn_with_stdin(self.build_command())?;

        let stderr = child.stderr.take();
        let err_prefix = prefix.clone();
        let stderr_thread = std::thread::spawn(move || {
            if let Some(stderr) = stderr {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    tracing::info!("[{}] {}", err_prefix, line);
                }
            }
        });

        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                tracing::info!("[{}] {}", prefix, line);
            }
        }
        let _ = stderr_thread.join();

        let status = child
            .wait()
            .with_context(|| format!("failed to wait for `{}`", self.program.display()));
        self.join_feeder(feeder);
        status
    }

    /// Execute with stdin, stdout and stderr inherited from this process.
    pub fn exec_passthrough(&self) -> Result<ExitStatus> {
        let mut cmd = self.build_command();
        if let Some(data) = self.stdin.clone() {
            cmd.stdin(Stdio::piped());
            let mut child = cmd
                .spawn()
                .with_context(|| format!("failed to spawn `{}`", self.display_command()))?;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(&data)?;
            }
            return child
                .wait()
                .with_context(|| format!("failed to wait for `{}`", self.program.display()));
        }
        cmd.status()
            .with_context(|| format!("failed to run `{}`", self.display_command()))
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| {
            if a.is_empty() || a.contains(char::is_whitespace) {
                format!("'{}'", a.replace('\'', "'\\''"))
            } else {
                a.clone()
            }
        }));
        parts.join(" ")
    }
}

/// Seam through which every external tool invocation of a build flows.
///
/// Non-zero exit status is an error.
pub trait CommandRunner: Send + Sync {
    fn run(&self, cmd: &ProcessBuilder) -> Result<()>;
}

/// Runs commands for real, streaming their output to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &ProcessBuilder) -> Result<()> {
        let status = cmd.exec_logged()?;
        if !status.success() {
            bail!(
                "`{}` failed with exit code {:?}",
                cmd.display_command(),
                status.code()
            );
        }
        Ok(())
    }
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}
