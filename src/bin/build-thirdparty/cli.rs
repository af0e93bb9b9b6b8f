//! CLI definitions using clap.

use std::path::PathBuf;

use clap::Parser;

use thirdparty::core::{BuildVariant, CompilerFamily};

/// Build the third-party dependencies of every build variant
#[derive(Parser, Debug)]
#[command(name = "build-thirdparty")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Dependencies to build (default: all)
    pub dependencies: Vec<String>,

    /// Build only this variant, after `common`
    #[arg(long, value_name = "VARIANT")]
    pub build_type: Option<BuildVariant>,

    /// Remove build directories, sources and archives of the selected
    /// dependencies before building
    #[arg(long)]
    pub clean: bool,

    /// Do not build the ASAN and TSAN variants
    #[arg(long)]
    pub skip_sanitizers: bool,

    /// Record the checksum of archives missing from the checksum file
    #[arg(long = "add_checksum", alias = "add-checksum")]
    pub add_checksum: bool,

    /// Dependencies to skip, comma separated
    #[arg(long, value_delimiter = ',', conflicts_with = "dependencies")]
    pub skip: Vec<String>,

    /// Parallelism passed to make and other build tools
    #[arg(short = 'j', long, env = "THIRDPARTY_MAKE_PARALLELISM")]
    pub make_parallelism: Option<usize>,

    /// Build everything with a single compiler family
    #[arg(long, value_name = "FAMILY")]
    pub single_compiler_type: Option<CompilerFamily>,

    /// Look for compilers under <DIR>/bin only
    #[arg(long, value_name = "DIR")]
    pub compiler_prefix: Option<PathBuf>,

    /// Suffix of compiler executable names, e.g. `-11`
    #[arg(long, value_name = "SUFFIX")]
    pub compiler_suffix: Option<String>,

    /// Use the gcc of devtoolset <N> (Linux only)
    #[arg(long, value_name = "N")]
    pub devtoolset: Option<u32>,

    /// Route compiler invocations through the compiler wrapper
    #[arg(long)]
    pub use_compiler_wrapper: bool,

    /// Run compilers through ccache (implies --use-compiler-wrapper)
    #[arg(long)]
    pub use_ccache: bool,

    /// Only download, extract and patch sources
    #[arg(long)]
    pub download_extract_only: bool,

    /// Write a JSON license report of the selected dependencies and exit
    #[arg(long, value_name = "FILE")]
    pub license_report: Option<PathBuf>,

    /// Third-party root directory
    #[arg(long, env = "THIRDPARTY_DIR", value_name = "DIR")]
    pub thirdparty_dir: Option<PathBuf>,

    /// Alternate base toolchain root (Linux only)
    #[arg(long, env = "THIRDPARTY_TOOLCHAIN_ROOT", value_name = "DIR", hide = true)]
    pub toolchain_root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "build-thirdparty",
            "--build-type",
            "asan",
            "--add-checksum",
            "--skip",
            "zlib,lz4",
            "-j",
            "8",
        ])
        .unwrap();
        assert_eq!(cli.build_type, Some(BuildVariant::Asan));
        assert!(cli.add_checksum);
        assert_eq!(cli.skip, ["zlib", "lz4"]);
        assert_eq!(cli.make_parallelism, Some(8));

        let cli = Cli::try_parse_from(["build-thirdparty", "--add_checksum", "zlib"]).unwrap();
        assert!(cli.add_checksum);
        assert_eq!(cli.dependencies, ["zlib"]);
    }

    #[test]
    fn test_skip_conflicts_with_dependency_list() {
        assert!(Cli::try_parse_from(["build-thirdparty", "--skip", "zlib", "openssl"]).is_err());
        assert!(Cli::try_parse_from(["build-thirdparty", "--build-type", "msan"]).is_err());
    }
}
