//! Accepted dynamic-link resolutions per platform.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

use crate::core::Platform;

const LINUX_PATTERNS: &[&str] = &[
    r"\tlinux-vdso",
    r"\t/lib64/",
    r"\tstatically linked",
    r"\tnot a dynamic executable",
    r"ldd: warning: you do not have execution permission",
    r".* => /lib64/",
    r".* => /lib/",
    r".* => /usr/lib/x86_64-linux-gnu/",
];

const MACOS_PATTERNS: &[&str] = &[
    r"\t/usr/",
    r"\t/System/Library/",
    r"Archive ",
    r"/",
    r"\t@rpath",
    r"\t@loader_path",
];

/// The sanitizer runtime loads libc++ for libc++abi through a path `ldd`
/// cannot resolve, so this one missing library is tolerated there.
const LIBCXX_NOT_FOUND: &str = r"\tlibc[+][+][.]so[.][0-9]+ => not found";
const LIBCXXABI_PREFIX: &str = "libc++abi.so.";

/// Regular expressions, each anchored at the start of a line of link
/// inspection output.
#[derive(Debug, Clone)]
pub struct LibraryAllowlist {
    platform: Platform,
    patterns: Vec<Regex>,
    libcxx_not_found: Regex,
}

fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})"))
        .with_context(|| format!("invalid library allowlist pattern `{pattern}`"))
}

impl LibraryAllowlist {
    /// The built-in list for `platform`. Anything resolving into the
    /// third-party root is always allowed.
    pub fn for_platform(platform: Platform, thirdparty_root: &Path) -> Result<Self> {
        let root = regex::escape(&thirdparty_root.to_string_lossy());
        let mut patterns: Vec<String> = match platform {
            Platform::Linux => LINUX_PATTERNS.iter().map(|p| p.to_string()).collect(),
            Platform::MacOs => MACOS_PATTERNS.iter().map(|p| p.to_string()).collect(),
        };
        patterns.push(match platform {
            Platform::Linux => format!(".* => {root}"),
            Platform::MacOs => format!(r"\t{root}"),
        });

        Ok(LibraryAllowlist {
            platform,
            patterns: patterns
                .iter()
                .map(|p| anchored(p))
                .collect::<Result<_>>()?,
            libcxx_not_found: anchored(LIBCXX_NOT_FOUND)?,
        })
    }

    /// Accept links resolving into `dir`, e.g. a library directory added to
    /// the run path at build time.
    pub fn allow_lib_dir(&mut self, dir: &Path) -> Result<()> {
        let dir = regex::escape(&dir.to_string_lossy());
        let pattern = match self.platform {
            Platform::Linux => format!(".* => {dir}/"),
            Platform::MacOs => format!(r"\t{dir}/"),
        };
        self.patterns.push(anchored(&pattern)?);
        Ok(())
    }

    /// Accept lines matching a user-supplied expression.
    pub fn allow_pattern(&mut self, pattern: &str) -> Result<()> {
        self.patterns.push(anchored(pattern)?);
        Ok(())
    }

    /// Whether one output line for `file_name` is acceptable.
    pub fn is_allowed(&self, file_name: &str, line: &str) -> bool {
        if self.patterns.iter().any(|re| re.is_match(line)) {
            return true;
        }
        file_name.starts_with(LIBCXXABI_PREFIX) && self.libcxx_not_found.is_match(line)
    }

    /// Lines of `output` that match nothing.
    pub fn bad_lines<'o>(&self, file_name: &str, output: &'o str) -> Vec<&'o str> {
        output
            .lines()
            .filter(|line| !self.is_allowed(file_name, line))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> LibraryAllowlist {
        LibraryAllowlist::for_platform(Platform::Linux, Path::new("/opt/tp")).unwrap()
    }

    #[test]
    fn test_linux_system_and_thirdparty_libraries() {
        let allowlist = linux();
        for line in [
            "\tlinux-vdso.so.1 (0x00007ffd)",
            "\tlibm.so.6 => /lib64/libm.so.6 (0x00007f)",
            "\tlibc.so.6 => /lib/x86_64-linux-gnu/libc.so.6",
            "\tlibz.so.1 => /opt/tp/installed/common/lib/libz.so.1",
            "\t/lib64/ld-linux-x86-64.so.2 (0x00007f)",
            "\tnot a dynamic executable",
        ] {
            assert!(allowlist.is_allowed("libfoo.so", line), "{line}");
        }
    }

    #[test]
    fn test_linux_rejects_foreign_paths() {
        let allowlist = linux();
        let output = "\tlibssl.so.1.1 => /usr/local/lib/libssl.so.1.1\n\
                      \tlibc.so.6 => /lib64/libc.so.6\n\
                      \tlibgflags.so.2 => not found\n";
        assert_eq!(
            allowlist.bad_lines("libglog.so", output),
            [
                "\tlibssl.so.1.1 => /usr/local/lib/libssl.so.1.1",
                "\tlibgflags.so.2 => not found"
            ]
        );
    }

    #[test]
    fn test_allowed_lib_dir() {
        let mut allowlist = linux();
        let line = "\tlibssl.so.1.1 => /usr/local/ssl/lib/libssl.so.1.1";
        assert!(!allowlist.is_allowed("libcurl.so", line));
        allowlist.allow_lib_dir(Path::new("/usr/local/ssl/lib")).unwrap();
        assert!(allowlist.is_allowed("libcurl.so", line));
    }

    #[test]
    fn test_libcxxabi_exception_is_narrow() {
        let allowlist = linux();
        let line = "\tlibc++.so.1 => not found";
        assert!(allowlist.is_allowed("libc++abi.so.1.0", line));
        assert!(!allowlist.is_allowed("libfoo.so", line));
        assert!(!allowlist.is_allowed("libc++abi.so.1.0", "\tlibunwind.so.1 => not found"));
    }

    #[test]
    fn test_macos_patterns() {
        let allowlist =
            LibraryAllowlist::for_platform(Platform::MacOs, Path::new("/Users/me/tp")).unwrap();
        assert!(allowlist.is_allowed("libz.dylib", "\t/usr/lib/libSystem.B.dylib (compat 1.0.0)"));
        assert!(allowlist.is_allowed("libz.dylib", "\t@rpath/libz.1.dylib"));
        assert!(allowlist.is_allowed("libz.dylib", "/Users/me/tp/installed/common/lib/libz.dylib:"));
        assert!(!allowlist.is_allowed("libz.dylib", "\t/opt/homebrew/lib/libssl.dylib"));
    }

    #[test]
    fn test_custom_pattern_is_anchored() {
        let mut allowlist = linux();
        allowlist.allow_pattern(r"\tlibcuda").unwrap();
        assert!(allowlist.is_allowed("x", "\tlibcuda.so.1 => /usr/local/cuda/lib/libcuda.so.1"));
        assert!(!allowlist.is_allowed("x", "\tlibfoo.so => /srv/libcuda.so"));
        assert!(allowlist.allow_pattern("(").is_err());
    }
}
