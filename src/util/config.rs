//! Configuration file support.
//!
//! The third-party root may carry a `thirdparty.toml` next to the
//! `build_definitions/` directory. Every section is optional and a missing
//! file means all defaults. Command-line flags take precedence over the
//! `[toolchain]` section.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::util::retry::RetryPolicy;

/// File name of the configuration file inside the third-party root.
pub const CONFIG_FILE_NAME: &str = "thirdparty.toml";

/// Third-party build configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThirdpartyConfig {
    /// Registry ordering
    pub registry: RegistryConfig,

    /// Compiler lookup settings
    pub toolchain: ToolchainConfig,

    /// Download retry and mirror settings
    pub download: DownloadConfig,

    /// Build stamp settings
    pub stamp: StampConfig,

    /// Link audit settings
    pub audit: AuditConfig,
}

/// Registry ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Dependency names in build order. Empty means every definition file,
    /// sorted by name.
    pub dependencies: Vec<String>,
}

/// Compiler lookup settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Look for compilers under `<prefix>/bin` only.
    pub compiler_prefix: Option<PathBuf>,

    /// Suffix appended to compiler executable names (e.g. `-11`).
    pub compiler_suffix: Option<String>,

    /// Roots searched for `bin/gcc` and `bin/g++`, first match wins.
    pub gcc_candidate_roots: Vec<PathBuf>,

    /// Roots searched for `bin/clang` and `bin/clang++`. Relative entries
    /// are resolved against the third-party root.
    pub clang_candidate_roots: Vec<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            compiler_prefix: None,
            compiler_suffix: None,
            gcc_candidate_roots: vec![PathBuf::from("/usr")],
            clang_candidate_roots: vec![PathBuf::from("clang-toolchain"), PathBuf::from("/usr")],
        }
    }
}

/// Download retry and mirror settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_attempts: u32,
    pub initial_delay_secs: f64,
    pub delay_increment_secs: f64,

    /// Prefix the archive file name is appended to once the primary URL
    /// has exhausted its attempts.
    pub mirror_url_prefix: Option<String>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        DownloadConfig {
            max_attempts: 20,
            initial_delay_secs: 1.0,
            delay_increment_secs: 0.5,
            mirror_url_prefix: None,
        }
    }
}

impl DownloadConfig {
    /// The retry policy these settings describe.
    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let initial_delay = Duration::try_from_secs_f64(self.initial_delay_secs)
            .context("download.initial_delay_secs must be a non-negative number")?;
        let increment = Duration::try_from_secs_f64(self.delay_increment_secs)
            .context("download.delay_increment_secs must be a non-negative number")?;
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay,
            increment,
        })
    }
}

/// Build stamp settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampConfig {
    /// Files shared by every dependency whose changes invalidate all build
    /// stamps, relative to the third-party root. `thirdparty.toml` is
    /// tracked whether or not it is listed.
    pub driver_files: Vec<PathBuf>,
}

/// Link audit settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Additional regular expressions accepted in link-inspection output.
    pub extra_allowed_patterns: Vec<String>,
}

impl ThirdpartyConfig {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;

        let config: ThirdpartyConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `thirdparty.toml` from the given root, or defaults when absent.
    pub fn load_from_root(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.exists() {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.download.max_attempts == 0 {
            bail!("download.max_attempts must be at least 1");
        }
        self.download.retry_policy()?;
        for pattern in &self.audit.extra_allowed_patterns {
            regex::Regex::new(pattern)
                .with_context(|| format!("invalid audit.extra_allowed_patterns entry: {pattern}"))?;
        }
        Ok(())
    }
}
