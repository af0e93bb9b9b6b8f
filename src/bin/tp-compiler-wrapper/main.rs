//! tp-compiler-wrapper - stands in for `cc` and `cxx` during third-party
//! builds.
//!
//! Installed as the `cc` and `cxx` symlinks of `build/compiler-wrappers`.
//! The name it was invoked under selects the real compiler, which is taken
//! from the environment the build orchestrator set up, and runs it, through
//! ccache when requested. The compiler's exit status is passed on.

use std::ffi::OsString;
use std::path::Path;

use anyhow::{bail, Context, Result};

use thirdparty::builder::toolchain::{REAL_CXX_COMPILER_ENV, REAL_C_COMPILER_ENV, USE_CCACHE_ENV};
use thirdparty::util::ProcessBuilder;

fn main() {
    match run(std::env::args_os().collect()) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn real_compiler_env(argv0: &Path) -> Result<&'static str> {
    let invoked = argv0
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match invoked.as_str() {
        "cc" => Ok(REAL_C_COMPILER_ENV),
        "cxx" => Ok(REAL_CXX_COMPILER_ENV),
        _ => bail!("invoked as `{invoked}`; expected to be invoked as `cc` or `cxx`"),
    }
}

fn run(argv: Vec<OsString>) -> Result<i32> {
    let Some((argv0, args)) = argv.split_first() else {
        bail!("missing program name");
    };
    let var = real_compiler_env(Path::new(argv0))?;
    let real = std::env::var(var).with_context(|| format!("{var} is not set"))?;
    let use_ccache = std::env::var(USE_CCACHE_ENV).is_ok_and(|v| v == "1");

    let cmd = if use_ccache {
        ProcessBuilder::new("ccache")
            .arg(&real)
            .env("CCACHE_COMPILER", &real)
    } else {
        ProcessBuilder::new(&real)
    };
    let status = cmd.args(args).exec_passthrough()?;
    Ok(status.code().unwrap_or(1))
}
