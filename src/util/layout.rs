//! On-disk layout of a third-party root.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::{BuildVariant, DependencyDescriptor};

/// Directory holding one `<name>.toml` descriptor per dependency.
pub const DEFINITIONS_DIR: &str = "build_definitions";

/// Checksum manifest file name.
pub const CHECKSUM_FILE: &str = "thirdparty_src_checksums.txt";

/// Per-build environment dump written into every build directory.
pub const ENV_DUMP_FILE: &str = "dependency_env.sh";

/// Paths derived from the third-party root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemLayout {
    root: PathBuf,
}

impl FileSystemLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileSystemLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn definitions_dir(&self) -> PathBuf {
        self.root.join(DEFINITIONS_DIR)
    }

    /// Descriptor file for a dependency. Also the file its build stamp tracks.
    pub fn definition_file(&self, name: &str) -> PathBuf {
        self.definitions_dir().join(format!("{name}.toml"))
    }

    pub fn checksum_file(&self) -> PathBuf {
        self.root.join(CHECKSUM_FILE)
    }

    pub fn patches_dir(&self) -> PathBuf {
        self.root.join("patches")
    }

    pub fn download_dir(&self) -> PathBuf {
        self.root.join("download")
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn build_root(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn installed_root(&self) -> PathBuf {
        self.root.join("installed")
    }

    /// `build/<variant>`
    pub fn build_dir(&self, variant: BuildVariant) -> PathBuf {
        self.build_root().join(variant.dir_name())
    }

    /// `build/<variant>/<dependency>`
    pub fn dependency_build_dir(&self, variant: BuildVariant, name: &str) -> PathBuf {
        self.build_dir(variant).join(name)
    }

    /// `build/<variant>/.build-stamp-<dependency>`
    pub fn stamp_path(&self, variant: BuildVariant, name: &str) -> PathBuf {
        self.build_dir(variant).join(format!(".build-stamp-{name}"))
    }

    /// Install prefix of a variant, `installed/<variant>`.
    pub fn prefix(&self, variant: BuildVariant) -> PathBuf {
        self.installed_root().join(variant.dir_name())
    }

    /// Install prefix every variant links against.
    pub fn common_prefix(&self) -> PathBuf {
        self.prefix(BuildVariant::Common)
    }

    /// Private libc++ installation of a variant.
    pub fn libcxx_prefix(&self, variant: BuildVariant) -> PathBuf {
        self.prefix(variant).join("libcxx")
    }

    /// Extracted source tree of a dependency.
    pub fn source_dir(&self, dep: &DependencyDescriptor) -> PathBuf {
        self.src_dir().join(dep.dir_name())
    }

    /// Downloaded archive of a dependency.
    pub fn archive_path(&self, dep: &DependencyDescriptor) -> Result<PathBuf> {
        Ok(self.download_dir().join(dep.archive_name()?))
    }

    /// Where the `cc`/`cxx` compiler wrapper symlinks live.
    pub fn compiler_wrapper_dir(&self) -> PathBuf {
        self.build_root().join("compiler-wrappers")
    }
}
