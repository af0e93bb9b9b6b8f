//! Build context - everything an external build adapter needs for one
//! (dependency, variant) pair.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::builder::environment::BuildEnvironment;
use crate::builder::toolchain::ActiveToolchain;
use crate::core::{BuildVariant, Platform};
use crate::util::fs::write_string;
use crate::util::layout::ENV_DUMP_FILE;
use crate::util::process::ProcessBuilder;

/// Marks child processes as part of a third-party build.
pub const THIRDPARTY_BUILD_ENV: &str = "THIRDPARTY_BUILD";

pub const MAKE_PARALLELISM_ENV: &str = "THIRDPARTY_MAKE_PARALLELISM";

/// Immutable inputs of a single dependency build.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Dependency name
    pub dependency: String,

    pub variant: BuildVariant,
    pub platform: Platform,

    /// Patched source tree under `src/`
    pub source_dir: PathBuf,

    /// `build/<variant>/<dependency>`
    pub build_dir: PathBuf,

    /// The source tree was copied into `build_dir`
    pub sources_copied: bool,

    /// Install prefix of the variant
    pub prefix: PathBuf,

    pub common_prefix: PathBuf,

    pub toolchain: ActiveToolchain,
    pub env: BuildEnvironment,

    /// Make parallelism
    pub jobs: usize,
}

impl BuildContext {
    pub fn prefix_lib(&self) -> PathBuf {
        self.prefix.join("lib")
    }

    pub fn prefix_include(&self) -> PathBuf {
        self.prefix.join("include")
    }

    pub fn prefix_bin(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    /// Source tree the build reads: the copy in the build directory when
    /// sources are copied, the shared tree under `src/` otherwise.
    pub fn build_source_dir(&self) -> &Path {
        if self.sources_copied {
            &self.build_dir
        } else {
            &self.source_dir
        }
    }

    /// Prefix for child process output lines, `<dep> (<variant>)`.
    pub fn log_prefix(&self) -> String {
        format!("{} ({})", self.dependency, self.variant)
    }

    /// Environment exported to every command of the build.
    pub fn env_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.toolchain.env_vars().clone();
        vars.insert("CPPFLAGS".to_string(), self.env.preprocessor_flags.join(" "));
        vars.insert("CFLAGS".to_string(), self.env.c_flags.join(" "));
        vars.insert("CXXFLAGS".to_string(), self.env.cxx_flags.join(" "));
        vars.insert("LDFLAGS".to_string(), self.env.ld_flags.join(" "));
        vars.extend(self.env.extra_env.clone());
        vars.insert(THIRDPARTY_BUILD_ENV.to_string(), "1".to_string());
        vars.insert(MAKE_PARALLELISM_ENV.to_string(), self.jobs.to_string());
        vars
    }

    /// Expand placeholders in one argument.
    ///
    /// An argument that is exactly `{cflags}`, `{cxxflags}` or `{ldflags}`
    /// becomes the individual flags; anywhere else those placeholders are
    /// replaced by the space-joined flags.
    pub fn expand(&self, arg: &str) -> Vec<String> {
        match arg {
            "{cflags}" => return self.env.c_flags.clone(),
            "{cxxflags}" => return self.env.cxx_flags.clone(),
            "{ldflags}" => return self.env.ld_flags.clone(),
            _ => {}
        }
        if !arg.contains('{') {
            return vec![arg.to_string()];
        }

        let (lib, include, bin) = (self.prefix_lib(), self.prefix_include(), self.prefix_bin());
        let paths: [(&str, &Path); 7] = [
            ("{prefix_lib}", lib.as_path()),
            ("{prefix_include}", include.as_path()),
            ("{prefix_bin}", bin.as_path()),
            ("{prefix}", self.prefix.as_path()),
            ("{source_dir}", self.source_dir.as_path()),
            ("{build_dir}", self.build_dir.as_path()),
            ("{common_prefix}", self.common_prefix.as_path()),
        ];
        let mut expanded = arg.to_string();
        for (placeholder, path) in paths {
            expanded = expanded.replace(placeholder, &path.to_string_lossy());
        }
        let expanded = expanded
            .replace("{cc}", &self.toolchain.cc.to_string_lossy())
            .replace("{cxx}", &self.toolchain.cxx.to_string_lossy())
            .replace("{jobs}", &self.jobs.to_string())
            .replace("{dylib_suffix}", self.platform.dylib_suffix())
            .replace("{cflags}", &self.env.c_flags.join(" "))
            .replace("{cxxflags}", &self.env.cxx_flags.join(" "))
            .replace("{ldflags}", &self.env.ld_flags.join(" "));
        vec![expanded]
    }

    pub fn expand_all<S: AsRef<str>>(&self, args: &[S]) -> Vec<String> {
        args.iter().flat_map(|arg| self.expand(arg.as_ref())).collect()
    }

    /// A command running in `cwd` with the build environment.
    pub fn command<S: AsRef<str>>(&self, argv: &[S], cwd: &Path) -> Result<ProcessBuilder> {
        let argv = self.expand_all(argv);
        Ok(ProcessBuilder::from_argv(&argv)?
            .envs(self.env_vars())
            .cwd(cwd)
            .log_prefix(self.log_prefix()))
    }

    /// Write `dependency_env.sh` into the build directory so a failed build
    /// can be reproduced by hand.
    pub fn write_env_dump(&self) -> Result<PathBuf> {
        let path = self.build_dir.join(ENV_DUMP_FILE);
        let mut contents = format!("# Environment for building {}\n", self.log_prefix());
        for (key, value) in self.env_vars() {
            contents.push_str(&format!("export {}={}\n", key, shell_quote(&value)));
        }
        write_string(&path, &contents)?;
        tracing::debug!("Wrote {}", path.display());
        Ok(path)
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::build_context;
    use tempfile::TempDir;

    #[test]
    fn test_expand_placeholders() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = build_context(tmp.path(), "gflags", BuildVariant::Asan);
        ctx.env.c_flags = vec!["-O2".to_string(), "-fPIC".to_string()];

        assert_eq!(
            ctx.expand("--prefix={prefix}"),
            [format!("--prefix={}", ctx.prefix.display())]
        );
        assert_eq!(
            ctx.expand("{prefix_lib}/libgflags.{dylib_suffix}"),
            [format!("{}/libgflags.so", ctx.prefix_lib().display())]
        );
        assert_eq!(ctx.expand("-j{jobs}"), ["-j4"]);
        assert_eq!(ctx.expand("{cflags}"), ["-O2", "-fPIC"]);
        assert_eq!(ctx.expand("CFLAGS={cflags}"), ["CFLAGS=-O2 -fPIC"]);
        assert_eq!(ctx.expand("plain"), ["plain"]);
    }

    #[test]
    fn test_env_vars() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = build_context(tmp.path(), "gflags", BuildVariant::Asan);
        ctx.env.ld_flags = vec!["-L/a".to_string(), "-L/b".to_string()];
        ctx.env
            .extra_env
            .insert("ASAN_OPTIONS".to_string(), "detect_odr_violation=0".to_string());

        let vars = ctx.env_vars();
        assert_eq!(vars["LDFLAGS"], "-L/a -L/b");
        assert_eq!(vars["ASAN_OPTIONS"], "detect_odr_violation=0");
        assert_eq!(vars[THIRDPARTY_BUILD_ENV], "1");
        assert_eq!(vars[MAKE_PARALLELISM_ENV], "4");
        assert_eq!(vars["CC"], ctx.toolchain.cc.to_string_lossy());
    }

    #[test]
    fn test_env_dump() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = build_context(tmp.path(), "gflags", BuildVariant::Common);
        ctx.env.c_flags = vec!["-DNAME='x'".to_string()];
        std::fs::create_dir_all(&ctx.build_dir).unwrap();

        let path = ctx.write_env_dump().unwrap();
        let dump = std::fs::read_to_string(path).unwrap();
        assert!(dump.starts_with("# Environment for building gflags (common)\n"));
        assert!(dump.contains("export CFLAGS='-DNAME='\\''x'\\'''\n"));
        assert!(dump.contains("export THIRDPARTY_BUILD='1'\n"));
    }
}
