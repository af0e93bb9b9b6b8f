//! Compiler resolution.
//!
//! Locates concrete C/C++ compiler executables for a compiler family,
//! honoring the platform's constraints and any alternate toolchain root.
//!
//! Resolution order for a family:
//! 1. `<compiler_prefix>/bin` when a prefix is configured
//! 2. `<alternate root>/bin` when an alternate base toolchain root is set
//! 3. the family's candidate roots, first root holding the C compiler wins
//! 4. `PATH`
//!
//! Whatever is found must exist on disk and, with a pinned devtoolset, sit
//! under the `/devtoolset-<n>/` directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::core::{BuildVariant, CompilerFamily, Platform};
use crate::util::fs::{ensure_dir, remove_path, symlink};
use crate::util::layout::FileSystemLayout;

/// Environment variables read by the compiler wrapper.
pub const REAL_C_COMPILER_ENV: &str = "THIRDPARTY_REAL_C_COMPILER";
pub const REAL_CXX_COMPILER_ENV: &str = "THIRDPARTY_REAL_CXX_COMPILER";
pub const USE_CCACHE_ENV: &str = "THIRDPARTY_USE_CCACHE";

/// File name of the compiler wrapper binary.
pub const COMPILER_WRAPPER_BIN: &str = "tp-compiler-wrapper";

/// Compiler resolution failures. All of them are fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolchainError {
    #[error("not allowed to use {family}: {reason}")]
    Forbidden {
        family: CompilerFamily,
        reason: &'static str,
    },

    #[error("invalid compiler options: {0}")]
    InvalidOptions(String),

    #[error("directory {} does not exist", .0.display())]
    MissingBinDir(PathBuf),

    #[error(
        "failed to find {family} at the following locations: [{}]",
        searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    NotFound {
        family: CompilerFamily,
        searched: Vec<PathBuf>,
    },

    #[error("compiler executable does not exist: {}", .0.display())]
    MissingExecutable(PathBuf),

    #[error("invalid compiler path: {}; substring not found: {fragment}", path.display())]
    DevtoolsetMismatch { path: PathBuf, fragment: String },
}

/// User-controlled compiler selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolchainOptions {
    /// Only ever resolve this family.
    pub single_compiler_type: Option<CompilerFamily>,

    pub compiler_prefix: Option<PathBuf>,

    /// Appended to executable names, e.g. `-11` for `clang-11`.
    pub compiler_suffix: String,

    /// Pinned devtoolset generation (Linux, gcc only).
    pub devtoolset: Option<u32>,

    pub use_compiler_wrapper: bool,
    pub use_ccache: bool,

    /// Alternate base toolchain root, from `THIRDPARTY_TOOLCHAIN_ROOT`.
    pub alternate_root: Option<PathBuf>,

    pub gcc_candidate_roots: Vec<PathBuf>,
    pub clang_candidate_roots: Vec<PathBuf>,
}

/// A resolved compiler pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainSpec {
    pub family: CompilerFamily,
    pub cc: PathBuf,
    pub cxx: PathBuf,
}

/// Paths to the `cc`/`cxx` wrapper symlinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerWrappers {
    pub cc: PathBuf,
    pub cxx: PathBuf,
}

impl CompilerWrappers {
    /// Create `build/compiler-wrappers/{cc,cxx}` pointing at the wrapper
    /// executable.
    pub fn install(layout: &FileSystemLayout, wrapper_exe: &Path) -> Result<Self> {
        if !wrapper_exe.is_file() {
            return Err(ToolchainError::MissingExecutable(wrapper_exe.to_path_buf()).into());
        }
        let dir = layout.compiler_wrapper_dir();
        ensure_dir(&dir)?;

        let wrappers = CompilerWrappers {
            cc: dir.join("cc"),
            cxx: dir.join("cxx"),
        };
        for link in [&wrappers.cc, &wrappers.cxx] {
            remove_path(link)?;
            symlink(wrapper_exe, link)
                .with_context(|| format!("failed to create symlink: {}", link.display()))?;
        }
        tracing::debug!("Compiler wrappers installed in {}", dir.display());
        Ok(wrappers)
    }

    /// Find the wrapper executable next to the running binary, then on
    /// `PATH`.
    pub fn locate_wrapper_exe() -> Result<PathBuf> {
        let sibling = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(COMPILER_WRAPPER_BIN)))
            .filter(|path| path.is_file());
        sibling
            .or_else(|| which::which(COMPILER_WRAPPER_BIN).ok())
            .ok_or_else(|| {
                ToolchainError::MissingExecutable(PathBuf::from(COMPILER_WRAPPER_BIN)).into()
            })
    }
}

/// The toolchain every external build of a variant runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveToolchain {
    pub spec: ToolchainSpec,

    /// What `CC` and `CXX` point at: the real compilers or the wrappers.
    pub cc: PathBuf,
    pub cxx: PathBuf,

    env: BTreeMap<String, String>,
}

impl ActiveToolchain {
    /// Environment variables exporting this toolchain to child processes.
    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

/// Resolves compilers according to [`ToolchainOptions`].
#[derive(Debug, Clone)]
pub struct ToolchainResolver {
    options: ToolchainOptions,
    platform: Platform,
}

impl ToolchainResolver {
    /// Validate the options for `platform`.
    pub fn new(mut options: ToolchainOptions, platform: Platform) -> Result<Self, ToolchainError> {
        if platform == Platform::MacOs && options.single_compiler_type == Some(CompilerFamily::Gcc)
        {
            return Err(ToolchainError::InvalidOptions(
                "only clang is supported on macOS".to_string(),
            ));
        }
        if let Some(devtoolset) = options.devtoolset {
            if platform != Platform::Linux {
                return Err(ToolchainError::InvalidOptions(
                    "--devtoolset is only supported on Linux".to_string(),
                ));
            }
            if options.single_compiler_type == Some(CompilerFamily::Clang) {
                return Err(ToolchainError::InvalidOptions(
                    "--devtoolset cannot be combined with clang".to_string(),
                ));
            }
            options
                .gcc_candidate_roots
                .insert(0, PathBuf::from(format!("/opt/rh/devtoolset-{devtoolset}/root/usr")));
        }

        if options.alternate_root.is_some()
            && (platform != Platform::Linux
                || options.single_compiler_type.is_some()
                || options.compiler_prefix.is_some()
                || !options.compiler_suffix.is_empty())
        {
            tracing::debug!("Ignoring alternate toolchain root");
            options.alternate_root = None;
        }

        Ok(ToolchainResolver { options, platform })
    }

    pub fn options(&self) -> &ToolchainOptions {
        &self.options
    }

    pub fn alternate_root(&self) -> Option<&Path> {
        self.options.alternate_root.as_deref()
    }

    pub fn use_only_clang(&self) -> bool {
        self.platform == Platform::MacOs
            || self.options.single_compiler_type == Some(CompilerFamily::Clang)
    }

    pub fn use_only_gcc(&self) -> bool {
        self.options.devtoolset.is_some()
            || self.options.single_compiler_type == Some(CompilerFamily::Gcc)
    }

    /// The family a variant is built with under these options.
    pub fn family_for(&self, variant: BuildVariant) -> CompilerFamily {
        if self.use_only_clang() {
            CompilerFamily::Clang
        } else if self.use_only_gcc() {
            CompilerFamily::Gcc
        } else {
            variant.compiler_family(self.platform)
        }
    }

    /// Locate the compiler pair of `family`.
    pub fn resolve(&self, family: CompilerFamily) -> Result<ToolchainSpec, ToolchainError> {
        match family {
            CompilerFamily::Gcc if self.use_only_clang() => {
                return Err(ToolchainError::Forbidden {
                    family,
                    reason: "only clang may be used with the current options",
                });
            }
            CompilerFamily::Clang if self.use_only_gcc() => {
                return Err(ToolchainError::Forbidden {
                    family,
                    reason: "only gcc may be used with the current options",
                });
            }
            _ => {}
        }

        let (c_name, cxx_name) = family.executable_names();
        let suffix = &self.options.compiler_suffix;
        let c_name = format!("{c_name}{suffix}");
        let cxx_name = format!("{cxx_name}{suffix}");

        let (cc, cxx) = if let Some(prefix) = &self.options.compiler_prefix {
            let bin = prefix.join("bin");
            if !bin.is_dir() {
                return Err(ToolchainError::MissingBinDir(bin));
            }
            (bin.join(&c_name), bin.join(&cxx_name))
        } else if let Some(root) = &self.options.alternate_root {
            let bin = root.join("bin");
            (bin.join(&c_name), bin.join(&cxx_name))
        } else {
            let roots = match family {
                CompilerFamily::Gcc => &self.options.gcc_candidate_roots,
                CompilerFamily::Clang => &self.options.clang_candidate_roots,
            };
            let found = roots
                .iter()
                .map(|root| root.join("bin"))
                .find(|bin| bin.join(&c_name).exists());
            match found {
                Some(bin) => (bin.join(&c_name), bin.join(&cxx_name)),
                None => match (which::which(&c_name), which::which(&cxx_name)) {
                    (Ok(cc), Ok(cxx)) => (cc, cxx),
                    _ => {
                        return Err(ToolchainError::NotFound {
                            family,
                            searched: roots.clone(),
                        })
                    }
                },
            }
        };

        for compiler in [&cc, &cxx] {
            self.validate_compiler_path(compiler)?;
        }

        Ok(ToolchainSpec { family, cc, cxx })
    }

    fn validate_compiler_path(&self, path: &Path) -> Result<(), ToolchainError> {
        if let Some(devtoolset) = self.options.devtoolset {
            let fragment = format!("/devtoolset-{devtoolset}/");
            if !path.to_string_lossy().contains(&fragment) {
                return Err(ToolchainError::DevtoolsetMismatch {
                    path: path.to_path_buf(),
                    fragment,
                });
            }
        }
        if !path.exists() {
            return Err(ToolchainError::MissingExecutable(path.to_path_buf()));
        }
        Ok(())
    }

    /// Resolve `family` and describe it as the toolchain external builds
    /// use, optionally routed through the compiler wrappers.
    pub fn set_active(
        &self,
        family: CompilerFamily,
        wrappers: Option<&CompilerWrappers>,
    ) -> Result<ActiveToolchain, ToolchainError> {
        let spec = self.resolve(family)?;
        let mut env = BTreeMap::new();

        let (cc, cxx) = match wrappers.filter(|_| self.options.use_compiler_wrapper) {
            Some(wrappers) => {
                env.insert(
                    REAL_C_COMPILER_ENV.to_string(),
                    spec.cc.to_string_lossy().into_owned(),
                );
                env.insert(
                    REAL_CXX_COMPILER_ENV.to_string(),
                    spec.cxx.to_string_lossy().into_owned(),
                );
                env.insert(
                    USE_CCACHE_ENV.to_string(),
                    if self.options.use_ccache { "1" } else { "0" }.to_string(),
                );
                (wrappers.cc.clone(), wrappers.cxx.clone())
            }
            None => (spec.cc.clone(), spec.cxx.clone()),
        };
        env.insert("CC".to_string(), cc.to_string_lossy().into_owned());
        env.insert("CXX".to_string(), cxx.to_string_lossy().into_owned());

        tracing::info!("Compiler type: {}", spec.family);
        tracing::info!("C compiler: {}", spec.cc.display());
        tracing::info!("C++ compiler: {}", spec.cxx.display());

        Ok(ActiveToolchain { spec, cc, cxx, env })
    }
}
