//! Shared utilities

pub mod config;
pub mod fs;
pub mod hash;
pub mod layout;
pub mod process;
pub mod retry;

pub use config::ThirdpartyConfig;
pub use layout::FileSystemLayout;
pub use process::{CommandRunner, ProcessBuilder, SystemRunner};
pub use retry::RetryPolicy;
