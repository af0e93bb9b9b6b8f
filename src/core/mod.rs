//! Core data structures.
//!
//! This module contains the static model of the third-party matrix:
//! - Build variants, build groups and compiler families
//! - Host platform detection
//! - Dependency descriptors and their build strategies
//! - The dependency registry and selector

pub mod dependency;
pub mod platform;
pub mod registry;
pub mod variant;

pub use dependency::{BuildStrategy, DependencyDescriptor, ExtraDownload};
pub use platform::Platform;
pub use registry::{Registry, SelectionError};
pub use variant::{BuildGroup, BuildVariant, CompilerFamily};
