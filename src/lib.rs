//! Third-party dependency builder for a C++ database product.
//!
//! This crate fetches, patches and builds every external library the
//! product links against, once per build variant (common, uninstrumented,
//! clang uninstrumented, ASAN and TSAN), installs them into per-variant
//! prefixes and audits the result for links escaping those prefixes.

pub mod audit;
pub mod builder;
pub mod core;
pub mod ops;
pub mod sources;
pub mod util;

/// Fakes and fixtures for unit tests.
///
/// This module is only available when compiling with `--cfg test`. It
/// provides in-memory implementations of the download, process execution
/// and link inspection seams.
#[cfg(test)]
pub mod test_support;

pub use core::{BuildVariant, DependencyDescriptor, Platform, Registry};
pub use ops::{BuildOptions, BuildOutcome, Orchestrator};
pub use util::{FileSystemLayout, ThirdpartyConfig};
