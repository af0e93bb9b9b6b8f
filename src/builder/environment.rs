//! Compiler and linker flag composition per build variant.
//!
//! The composer never invokes a compiler. It only derives the flag sets
//! exported to a dependency's external build adapter.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::core::{BuildVariant, CompilerFamily, DependencyDescriptor, Platform};
use crate::util::layout::FileSystemLayout;

/// Oversized run-path entry reserved on Linux so that a later binary
/// patching step can rewrite it to a shorter real path in place.
pub fn placeholder_rpath() -> PathBuf {
    PathBuf::from(format!(
        "/tmp/making_sure_we_have_enough_room_to_set_rpath_later_{}_end_of_rpath",
        "_".repeat(256)
    ))
}

pub const ASAN_FLAGS: &[&str] = &[
    "-fsanitize=address",
    "-fsanitize=undefined",
    "-DADDRESS_SANITIZER",
];

pub const TSAN_FLAGS: &[&str] = &["-fsanitize=thread", "-DTHREAD_SANITIZER"];

/// C++ standard every dependency is compiled with.
const CXX_STANDARD_FLAGS: &[&str] = &["-std=c++14", "-frtti"];

const BASE_COMPILER_FLAGS: &[&str] = &["-fno-omit-frame-pointer", "-fPIC", "-O2", "-Wall"];

const MACOS_MIN_VERSION_FLAG: &str = "-mmacosx-version-min=10.14";

/// Linker flag adding `path` to the run path.
pub fn rpath_flag(path: &Path) -> String {
    format!("-Wl,-rpath,{}", path.display())
}

/// Flags and variables for one (dependency, variant) build.
///
/// `c_flags`, `cxx_flags`, `ld_flags` and `exe_ld_flags` are effective
/// values: compiler-independent flags and per-dependency extras included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub preprocessor_flags: Vec<String>,
    pub c_flags: Vec<String>,
    pub cxx_flags: Vec<String>,
    pub ld_flags: Vec<String>,

    /// Linker flags for executables only
    pub exe_ld_flags: Vec<String>,

    /// Additional variables, e.g. `ASAN_OPTIONS`
    pub extra_env: BTreeMap<String, String>,

    /// Absolute library directories added to the run path; the auditor
    /// accepts links into them.
    pub allowed_lib_dirs: BTreeSet<PathBuf>,
}

/// Accumulates flags in the order they are added, with helpers that
/// prepend where the private standard library must win.
#[derive(Default)]
struct FlagSet {
    preprocessor: Vec<String>,
    compiler: Vec<String>,
    cxx: Vec<String>,
    ld: Vec<String>,
    exe_only_ld: Vec<String>,
    allowed_lib_dirs: BTreeSet<PathBuf>,
}

impl FlagSet {
    fn add_include_path(&mut self, dir: &Path) {
        let flag = format!("-I{}", dir.display());
        self.preprocessor.push(flag.clone());
        self.compiler.push(flag);
    }

    fn add_rpath(&mut self, dir: &Path) {
        tracing::debug!("Adding RPATH: {}", dir.display());
        self.ld.push(rpath_flag(dir));
        self.allowed_lib_dirs.insert(dir.to_path_buf());
    }

    fn add_lib_dir_and_rpath(&mut self, dir: &Path) {
        self.ld.push(format!("-L{}", dir.display()));
        self.add_rpath(dir);
    }

    fn prepend_lib_dir_and_rpath(&mut self, dir: &Path) {
        self.ld.insert(0, rpath_flag(dir));
        self.ld.insert(0, format!("-L{}", dir.display()));
        self.allowed_lib_dirs.insert(dir.to_path_buf());
    }
}

/// Derives a [`BuildEnvironment`] for each (variant, dependency) pair.
#[derive(Debug, Clone)]
pub struct EnvironmentComposer {
    layout: FileSystemLayout,
    platform: Platform,
}

impl EnvironmentComposer {
    pub fn new(layout: FileSystemLayout, platform: Platform) -> Self {
        EnvironmentComposer { layout, platform }
    }

    /// Compose the flags for building `dep` as part of `variant` with
    /// `family`.
    pub fn compose(
        &self,
        variant: BuildVariant,
        family: CompilerFamily,
        dep: &DependencyDescriptor,
    ) -> BuildEnvironment {
        let mut flags = FlagSet::default();

        let mut prefixes = vec![self.layout.common_prefix()];
        if variant != BuildVariant::Common {
            prefixes.push(self.layout.prefix(variant));
        }
        for prefix in &prefixes {
            flags.add_include_path(&prefix.join("include"));
            flags.add_lib_dir_and_rpath(&prefix.join("lib"));
        }

        flags
            .compiler
            .extend(BASE_COMPILER_FLAGS.iter().map(|f| f.to_string()));

        match self.platform {
            Platform::Linux => {
                flags.ld.push(rpath_flag(&placeholder_rpath()));
            }
            Platform::MacOs => {
                flags.cxx.push("-stdlib=libc++".to_string());
                flags.ld.extend(["-lc++".to_string(), "-lc++abi".to_string()]);
                flags.compiler.push(MACOS_MIN_VERSION_FLAG.to_string());
                flags.ld.push("-Wl,-headerpad_max_install_names".to_string());
            }
        }

        flags
            .cxx
            .extend(CXX_STANDARD_FLAGS.iter().map(|f| f.to_string()));

        match variant {
            BuildVariant::Asan => flags
                .compiler
                .extend(ASAN_FLAGS.iter().map(|f| f.to_string())),
            BuildVariant::Tsan => {
                flags
                    .compiler
                    .extend(TSAN_FLAGS.iter().map(|f| f.to_string()));
                if family == CompilerFamily::Clang {
                    // The TSAN runtime can only be linked statically into
                    // executables.
                    flags.exe_only_ld.push("-fsanitize=thread".to_string());
                }
            }
            _ => {}
        }

        if self.platform != Platform::MacOs
            && family == CompilerFamily::Clang
            && variant != BuildVariant::Common
        {
            self.add_private_libcxx(&mut flags, variant, dep);
        }

        let mut extra_env = BTreeMap::new();
        if variant == BuildVariant::Asan {
            extra_env.insert(
                "ASAN_OPTIONS".to_string(),
                "detect_odr_violation=0".to_string(),
            );
        }

        let c_flags: Vec<String> = flags
            .compiler
            .iter()
            .chain(&dep.extra_cflags)
            .cloned()
            .collect();
        let cxx_flags: Vec<String> = flags
            .cxx
            .iter()
            .chain(&flags.compiler)
            .chain(&dep.extra_cxxflags)
            .cloned()
            .collect();
        let ld_flags: Vec<String> = flags.ld.iter().chain(&dep.extra_ldflags).cloned().collect();
        let exe_ld_flags: Vec<String> = ld_flags
            .iter()
            .chain(&flags.exe_only_ld)
            .cloned()
            .collect();

        tracing::debug!("cxx_flags : {}", cxx_flags.join(" "));
        tracing::debug!("c_flags   : {}", c_flags.join(" "));
        tracing::debug!("ld_flags  : {}", ld_flags.join(" "));

        BuildEnvironment {
            preprocessor_flags: flags.preprocessor,
            c_flags,
            cxx_flags,
            ld_flags,
            exe_ld_flags,
            extra_env,
            allowed_lib_dirs: flags.allowed_lib_dirs,
        }
    }

    /// Compile and link against the variant's private libc++ once it has
    /// been installed.
    fn add_private_libcxx(
        &self,
        flags: &mut FlagSet,
        variant: BuildVariant,
        dep: &DependencyDescriptor,
    ) {
        let libcxx = self.layout.libcxx_prefix(variant);
        let include = libcxx.join("include").join("c++").join("v1");
        let lib = libcxx.join("lib");

        if dep.provides_cxx_stdlib {
            // Built before the rest of libc++ is installed but must find it
            // at runtime.
            flags.add_rpath(&lib);
            return;
        }
        if !include.is_dir() {
            tracing::debug!(
                "No private libc++ at {}, using the compiler's standard library",
                include.display()
            );
            return;
        }

        tracing::debug!("libc++ include directory: {}", include.display());
        tracing::debug!("libc++ library directory: {}", lib.display());
        let mut cxx = vec![
            "-stdlib=libc++".to_string(),
            "-isystem".to_string(),
            include.display().to_string(),
            "-nostdinc++".to_string(),
        ];
        cxx.append(&mut flags.cxx);
        cxx.push("-Wno-error=unused-command-line-argument".to_string());
        flags.cxx = cxx;
        flags.ld.extend(["-lc++".to_string(), "-lc++abi".to_string()]);
        flags.prepend_lib_dir_and_rpath(&lib);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::descriptor;
    use tempfile::TempDir;

    fn composer(root: &Path, platform: Platform) -> EnvironmentComposer {
        EnvironmentComposer::new(FileSystemLayout::new(root), platform)
    }

    fn position(flags: &[String], flag: &str) -> usize {
        flags
            .iter()
            .position(|f| f == flag)
            .unwrap_or_else(|| panic!("{flag} not in {flags:?}"))
    }

    #[test]
    fn test_common_variant_on_linux() {
        let env = composer(Path::new("/tp"), Platform::Linux).compose(
            BuildVariant::Common,
            CompilerFamily::Gcc,
            &descriptor("zlib"),
        );
        assert_eq!(env.preprocessor_flags, ["-I/tp/installed/common/include"]);
        assert!(env.c_flags.contains(&"-fPIC".to_string()));
        assert!(!env.c_flags.iter().any(|f| f.starts_with("-fsanitize")));
        assert_eq!(
            &env.ld_flags[..2],
            ["-L/tp/installed/common/lib", "-Wl,-rpath,/tp/installed/common/lib"]
        );
        assert!(env
            .ld_flags
            .iter()
            .any(|f| f.contains("making_sure_we_have_enough_room")));
        assert!(env.extra_env.is_empty());
        assert!(env
            .allowed_lib_dirs
            .contains(Path::new("/tp/installed/common/lib")));
    }

    #[test]
    fn test_instrumented_variant_includes_common_prefix() {
        let env = composer(Path::new("/tp"), Platform::Linux).compose(
            BuildVariant::Asan,
            CompilerFamily::Clang,
            &descriptor("gflags"),
        );
        assert_eq!(
            env.preprocessor_flags,
            ["-I/tp/installed/common/include", "-I/tp/installed/asan/include"]
        );
        for flag in ASAN_FLAGS {
            assert!(env.c_flags.contains(&flag.to_string()));
            assert!(env.cxx_flags.contains(&flag.to_string()));
        }
        assert_eq!(env.extra_env["ASAN_OPTIONS"], "detect_odr_violation=0");
        assert!(env.ld_flags.contains(&"-Wl,-rpath,/tp/installed/asan/lib".to_string()));
    }

    #[test]
    fn test_tsan_executable_only_flags() {
        let env = composer(Path::new("/tp"), Platform::Linux).compose(
            BuildVariant::Tsan,
            CompilerFamily::Clang,
            &descriptor("gflags"),
        );
        assert!(env.c_flags.contains(&"-fsanitize=thread".to_string()));
        assert!(!env.ld_flags.contains(&"-fsanitize=thread".to_string()));
        assert_eq!(env.exe_ld_flags.last().map(String::as_str), Some("-fsanitize=thread"));
    }

    #[test]
    fn test_dependency_extras_come_last() {
        let mut dep = descriptor("snappy");
        dep.extra_cflags = vec!["-DSNAPPY".to_string()];
        dep.extra_cxxflags = vec!["-Wno-sign-compare".to_string()];
        dep.extra_ldflags = vec!["-lm".to_string()];
        let env = composer(Path::new("/tp"), Platform::Linux).compose(
            BuildVariant::Uninstrumented,
            CompilerFamily::Gcc,
            &dep,
        );
        assert_eq!(env.c_flags.last().map(String::as_str), Some("-DSNAPPY"));
        assert_eq!(env.cxx_flags.last().map(String::as_str), Some("-Wno-sign-compare"));
        assert_eq!(env.ld_flags.last().map(String::as_str), Some("-lm"));
        assert!(position(&env.cxx_flags, "-std=c++14") < position(&env.cxx_flags, "-O2"));
    }

    #[test]
    fn test_macos_flags() {
        let env = composer(Path::new("/tp"), Platform::MacOs).compose(
            BuildVariant::Common,
            CompilerFamily::Clang,
            &descriptor("zlib"),
        );
        assert_eq!(env.cxx_flags[0], "-stdlib=libc++");
        assert!(env.c_flags.contains(&MACOS_MIN_VERSION_FLAG.to_string()));
        assert!(env.ld_flags.contains(&"-Wl,-headerpad_max_install_names".to_string()));
        assert!(!env
            .ld_flags
            .iter()
            .any(|f| f.contains("making_sure_we_have_enough_room")));
    }

    #[test]
    fn test_private_libcxx_override() {
        let tmp = TempDir::new().unwrap();
        let composer = composer(tmp.path(), Platform::Linux);
        let dep = descriptor("gflags");

        let without = composer.compose(BuildVariant::Asan, CompilerFamily::Clang, &dep);
        assert!(!without.cxx_flags.contains(&"-nostdinc++".to_string()));

        let layout = FileSystemLayout::new(tmp.path());
        let libcxx = layout.libcxx_prefix(BuildVariant::Asan);
        std::fs::create_dir_all(libcxx.join("include/c++/v1")).unwrap();

        let with = composer.compose(BuildVariant::Asan, CompilerFamily::Clang, &dep);
        assert_eq!(with.cxx_flags[0], "-stdlib=libc++");
        assert_eq!(with.cxx_flags[2], libcxx.join("include/c++/v1").display().to_string());
        assert_eq!(with.ld_flags[0], format!("-L{}", libcxx.join("lib").display()));
        assert!(with.ld_flags.contains(&"-lc++abi".to_string()));
        assert!(with.allowed_lib_dirs.contains(&libcxx.join("lib")));

        let mut stdlib = descriptor("libcxx");
        stdlib.provides_cxx_stdlib = true;
        let own = composer.compose(BuildVariant::Asan, CompilerFamily::Clang, &stdlib);
        assert!(!own.cxx_flags.contains(&"-nostdinc++".to_string()));
        assert!(own.ld_flags.contains(&rpath_flag(&libcxx.join("lib"))));
    }
}
