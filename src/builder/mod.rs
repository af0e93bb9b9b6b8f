//! Per-dependency build machinery.
//!
//! Resolves compilers, composes flags, decides whether a rebuild is needed
//! and drives the dependency's own build system.

pub mod context;
pub mod environment;
pub mod stamp;
pub mod strategy;
pub mod toolchain;

pub use context::BuildContext;
pub use environment::{BuildEnvironment, EnvironmentComposer};
pub use stamp::{StampEngine, StampError};
pub use strategy::{run_strategy, StrategyError};
pub use toolchain::{
    ActiveToolchain, CompilerWrappers, ToolchainError, ToolchainOptions, ToolchainResolver,
    ToolchainSpec,
};
