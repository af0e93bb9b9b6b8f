//! High-level operations.
//!
//! This module contains the implementation of the `build-thirdparty`
//! command and its report-only modes.

pub mod build_thirdparty;
pub mod clean;
pub mod license;

pub use build_thirdparty::{
    merge_toolchain_options, plan_variants, prepare_out_dirs, BuildFailure, BuildOptions,
    BuildOutcome, Orchestrator,
};
pub use clean::clean;
pub use license::{license_entries, write_license_report, LicenseEntry};
