//! Build variants, build groups and compiler families.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::platform::Platform;

/// One full pass over the dependency matrix under a fixed compiler and
/// instrumentation configuration.
///
/// Variants are declared in build order; `Common` is the base variant and
/// always completes before any other starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildVariant {
    Common,
    Uninstrumented,
    ClangUninstrumented,
    Asan,
    Tsan,
}

impl BuildVariant {
    /// Every variant in build order.
    pub const ALL: [BuildVariant; 5] = [
        BuildVariant::Common,
        BuildVariant::Uninstrumented,
        BuildVariant::ClangUninstrumented,
        BuildVariant::Asan,
        BuildVariant::Tsan,
    ];

    /// Name used on the command line and for the per-variant directories.
    pub fn dir_name(self) -> &'static str {
        match self {
            BuildVariant::Common => "common",
            BuildVariant::Uninstrumented => "uninstrumented",
            BuildVariant::ClangUninstrumented => "clang_uninstrumented",
            BuildVariant::Asan => "asan",
            BuildVariant::Tsan => "tsan",
        }
    }

    /// The build group whose dependencies this variant builds.
    pub fn build_group(self) -> BuildGroup {
        match self {
            BuildVariant::Common => BuildGroup::Common,
            _ => BuildGroup::Instrumented,
        }
    }

    pub fn is_sanitizer(self) -> bool {
        matches!(self, BuildVariant::Asan | BuildVariant::Tsan)
    }

    /// Compiler family the variant is built with. macOS only has clang.
    pub fn compiler_family(self, platform: Platform) -> CompilerFamily {
        if platform == Platform::MacOs {
            return CompilerFamily::Clang;
        }
        match self {
            BuildVariant::Common | BuildVariant::Uninstrumented => CompilerFamily::Gcc,
            BuildVariant::ClangUninstrumented | BuildVariant::Asan | BuildVariant::Tsan => {
                CompilerFamily::Clang
            }
        }
    }
}

impl fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Error returned when a build type name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown build type `{0}`; expected one of: common, uninstrumented, clang_uninstrumented, asan, tsan")]
pub struct BuildVariantParseError(pub String);

impl std::str::FromStr for BuildVariant {
    type Err = BuildVariantParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('-', "_");
        BuildVariant::ALL
            .into_iter()
            .find(|v| v.dir_name() == normalized)
            .ok_or_else(|| BuildVariantParseError(s.to_string()))
    }
}

/// Classification of a dependency: built once, or rebuilt per
/// instrumentation variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildGroup {
    #[default]
    Common,
    Instrumented,
}

impl fmt::Display for BuildGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildGroup::Common => f.write_str("common"),
            BuildGroup::Instrumented => f.write_str("instrumented"),
        }
    }
}

/// C/C++ compiler family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerFamily {
    Gcc,
    Clang,
}

impl CompilerFamily {
    /// Executable names of the (C, C++) compilers, before any suffix.
    pub fn executable_names(self) -> (&'static str, &'static str) {
        match self {
            CompilerFamily::Gcc => ("gcc", "g++"),
            CompilerFamily::Clang => ("clang", "clang++"),
        }
    }
}

impl fmt::Display for CompilerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerFamily::Gcc => f.write_str("gcc"),
            CompilerFamily::Clang => f.write_str("clang"),
        }
    }
}

/// Error returned when a compiler family name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown compiler type `{0}`; expected 'gcc' or 'clang'")]
pub struct CompilerFamilyParseError(pub String);

impl std::str::FromStr for CompilerFamily {
    type Err = CompilerFamilyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gcc" => Ok(CompilerFamily::Gcc),
            "clang" => Ok(CompilerFamily::Clang),
            _ => Err(CompilerFamilyParseError(s.to_string())),
        }
    }
}
