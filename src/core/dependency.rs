//! Dependency descriptors.
//!
//! A descriptor is the static, declarative definition of one third-party
//! library: where its source comes from, how it is patched, which build
//! group it belongs to and which build strategy installs it. Descriptors are
//! read from `build_definitions/<name>.toml` once at startup and never
//! mutated afterwards.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::platform::Platform;
use crate::core::variant::{BuildGroup, BuildVariant};

/// URL value meaning "no upstream source, create an empty directory".
pub const MKDIR_URL: &str = "mkdir";

/// Archive extensions understood by the extractor, longest first.
pub const ARCHIVE_EXTENSIONS: &[&str] = &[
    ".tar.gz", ".tar.bz2", ".tar.xz", ".tgz", ".tbz2", ".txz", ".tar", ".zip",
];

/// A single command line, program first.
pub type CommandLine = Vec<String>;

/// Static description of one third-party dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDescriptor {
    /// Unique key, also the descriptor file stem
    pub name: String,

    pub version: String,

    /// URL template with `{version}`/`{name}` placeholders, or `mkdir`
    pub url: String,

    #[serde(default)]
    pub build_group: BuildGroup,

    #[serde(default)]
    pub license: Option<String>,

    /// Build in an isolated copy of the source tree
    #[serde(default)]
    pub copy_sources: bool,

    /// Patch files under `patches/`, applied in order
    #[serde(default)]
    pub patches: Vec<String>,

    /// Bumped whenever the patch set changes so existing source trees are
    /// re-extracted.
    #[serde(default)]
    pub patch_version: u32,

    #[serde(default = "default_patch_strip")]
    pub patch_strip: u32,

    /// Commands run in the source tree after all patches applied
    #[serde(default)]
    pub post_patch: Vec<CommandLine>,

    #[serde(default)]
    pub dir_name: Option<String>,

    #[serde(default)]
    pub archive_name: Option<String>,

    /// Platforms the dependency exists on; empty means all
    #[serde(default)]
    pub platforms: Vec<Platform>,

    /// Variants the dependency sits out even though its group matches
    #[serde(default)]
    pub skip_variants: Vec<BuildVariant>,

    #[serde(default)]
    pub extra_cflags: Vec<String>,

    #[serde(default)]
    pub extra_cxxflags: Vec<String>,

    #[serde(default)]
    pub extra_ldflags: Vec<String>,

    #[serde(default)]
    pub extra_downloads: Vec<ExtraDownload>,

    /// The dependency is the private C++ standard library itself (libc++ or
    /// libc++abi) and must not be compiled against it.
    #[serde(default)]
    pub provides_cxx_stdlib: bool,

    #[serde(default)]
    pub build: BuildStrategy,
}

fn default_patch_strip() -> u32 {
    1
}

/// An additional archive extracted into a subdirectory of the main source
/// tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtraDownload {
    pub name: String,
    pub version: String,

    /// URL template with `{version}`/`{name}` placeholders
    pub url: String,

    /// Subdirectory of the source tree the archive is extracted into
    pub dir_name: String,

    #[serde(default)]
    pub archive_name: Option<String>,

    /// Commands run inside `dir_name` after extraction
    #[serde(default)]
    pub post_exec: Vec<CommandLine>,
}

impl ExtraDownload {
    pub fn download_url(&self) -> String {
        expand_url(&self.url, &self.name, &self.version)
    }

    pub fn archive_name(&self) -> Result<String> {
        match &self.archive_name {
            Some(name) => Ok(name.clone()),
            None => default_archive_name(&self.name, &self.version, &self.download_url()),
        }
    }
}

/// How a dependency is built once its source tree is ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum BuildStrategy {
    /// `configure && make && make install`
    Configure(ConfigureBuild),

    /// CMake configure, build and install
    #[serde(rename = "cmake")]
    CMake(CMakeBuild),

    /// An explicit list of commands
    Custom(CustomBuild),
}

impl Default for BuildStrategy {
    fn default() -> Self {
        BuildStrategy::Custom(CustomBuild::default())
    }
}

impl BuildStrategy {
    pub fn kind(&self) -> &'static str {
        match self {
            BuildStrategy::Configure(_) => "configure",
            BuildStrategy::CMake(_) => "cmake",
            BuildStrategy::Custom(_) => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigureBuild {
    /// Configure script, relative to the source directory
    pub configure_cmd: String,

    /// Extra configure arguments; placeholders are expanded
    pub args: Vec<String>,

    /// Run `./autogen.sh` first
    pub run_autogen: bool,

    /// Run `autoreconf -i` first
    pub run_autoreconf: bool,

    /// Subdirectory of the source tree holding the configure script
    pub src_subdir: Option<String>,

    pub install_targets: Vec<String>,
}

impl Default for ConfigureBuild {
    fn default() -> Self {
        ConfigureBuild {
            configure_cmd: "./configure".to_string(),
            args: Vec::new(),
            run_autogen: false,
            run_autoreconf: false,
            src_subdir: None,
            install_targets: vec!["install".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CMakeBuild {
    /// Extra `-D...` arguments; placeholders are expanded
    pub args: Vec<String>,

    /// Generate Ninja files when `ninja` is available
    pub use_ninja: bool,

    /// Build twice, into `shared/` and `static/`
    pub shared_and_static: bool,

    /// Subdirectory of the source tree holding `CMakeLists.txt`
    pub src_subdir: Option<String>,

    pub install_targets: Vec<String>,
}

impl Default for CMakeBuild {
    fn default() -> Self {
        CMakeBuild {
            args: Vec::new(),
            use_ninja: false,
            shared_and_static: false,
            src_subdir: None,
            install_targets: vec!["install".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CustomBuild {
    /// Commands run in the build directory; placeholders are expanded
    pub commands: Vec<CommandLine>,
}

impl DependencyDescriptor {
    /// Load a descriptor from a TOML file. The `name` must match the file
    /// stem, since the stem is what the build stamp tracks.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read build definition: {}", path.display()))?;
        let dep: DependencyDescriptor = toml::from_str(&contents)
            .with_context(|| format!("failed to parse build definition: {}", path.display()))?;

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if dep.name != stem {
            bail!(
                "build definition {} declares name `{}`, expected `{}`",
                path.display(),
                dep.name,
                stem
            );
        }
        dep.validate()
            .with_context(|| format!("invalid build definition: {}", path.display()))?;
        Ok(dep)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            bail!("invalid dependency name `{}`", self.name);
        }
        if !self.is_mkdir() {
            self.archive_name()?;
        }
        for extra in &self.extra_downloads {
            extra.archive_name()?;
        }
        for command in self.post_patch.iter().chain(self.extra_downloads.iter().flat_map(|e| &e.post_exec)) {
            if command.is_empty() {
                bail!("empty command line in `{}`", self.name);
            }
        }
        Ok(())
    }

    /// Whether this is a synthetic dependency without upstream source.
    pub fn is_mkdir(&self) -> bool {
        self.url == MKDIR_URL
    }

    /// The URL with placeholders expanded.
    pub fn download_url(&self) -> String {
        if self.is_mkdir() {
            return self.url.clone();
        }
        expand_url(&self.url, &self.name, &self.version)
    }

    /// Name of the downloaded archive. `mkdir` dependencies still get a
    /// name so paths stay well-defined, but nothing is ever downloaded.
    pub fn archive_name(&self) -> Result<String> {
        match &self.archive_name {
            Some(name) => Ok(name.clone()),
            None if self.is_mkdir() => Ok(format!("{}-{}", self.name, self.version)),
            None => default_archive_name(&self.name, &self.version, &self.download_url()),
        }
    }

    /// Directory under `src/` the source tree lives in.
    pub fn dir_name(&self) -> String {
        self.dir_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.name, self.version))
    }

    /// Name of the sentinel file recording a completed fetch and patch.
    pub fn patch_level_marker(&self) -> String {
        format!("patchlevel-{}", self.patch_version)
    }

    /// Whether the dependency is built as part of `variant` on `platform`.
    pub fn participates(&self, platform: Platform, variant: BuildVariant) -> bool {
        self.exists_on(platform)
            && self.build_group == variant.build_group()
            && !self.skip_variants.contains(&variant)
    }

    /// Whether the dependency exists on `platform` at all.
    pub fn exists_on(&self, platform: Platform) -> bool {
        self.platforms.is_empty() || self.platforms.contains(&platform)
    }
}

fn expand_url(template: &str, name: &str, version: &str) -> String {
    template.replace("{version}", version).replace("{name}", name)
}

/// Archive extension of the last path segment of `url`.
pub fn archive_extension(url: &str) -> Option<&'static str> {
    let file_name = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string(),
        Err(_) => url.rsplit('/').next().unwrap_or_default().to_string(),
    };
    ARCHIVE_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| file_name.ends_with(ext))
}

fn default_archive_name(name: &str, version: &str, url: &str) -> Result<String> {
    match archive_extension(url) {
        Some(ext) => Ok(format!("{name}-{version}{ext}")),
        None => bail!(
            "cannot determine archive type of `{}` for `{}`; set `archive_name`",
            url,
            name
        ),
    }
}
