//! External build adapters.
//!
//! Each strategy shells out to the dependency's own build system with the
//! environment of a [`BuildContext`]. No orchestration logic lives here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::builder::context::BuildContext;
use crate::builder::environment::{ASAN_FLAGS, TSAN_FLAGS};
use crate::core::dependency::{BuildStrategy, CMakeBuild, ConfigureBuild, CustomBuild};
use crate::core::BuildVariant;
use crate::util::fs::{ensure_dir, remove_path};
use crate::util::process::{find_executable, CommandRunner};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error(
        "shared_and_static is set but the CMake arguments already mention -DBUILD_SHARED_LIBS: {}",
        args.join(" ")
    )]
    SharedLibsConflict { args: Vec<String> },

    #[error("compile command in {} is missing `{flag}`: {command}", file.display())]
    SanitizerFlagMissing {
        file: PathBuf,
        flag: String,
        command: String,
    },
}

/// Run the build strategy of a dependency.
pub fn run_strategy(
    ctx: &BuildContext,
    strategy: &BuildStrategy,
    runner: &dyn CommandRunner,
) -> Result<()> {
    tracing::debug!("Using {} build strategy", strategy.kind());
    match strategy {
        BuildStrategy::Configure(build) => build_with_configure(ctx, build, runner),
        BuildStrategy::CMake(build) => build_with_cmake(ctx, build, runner),
        BuildStrategy::Custom(build) => build_with_commands(ctx, build, runner),
    }
}

fn build_with_configure(
    ctx: &BuildContext,
    build: &ConfigureBuild,
    runner: &dyn CommandRunner,
) -> Result<()> {
    let script_dir = subdir(ctx.build_source_dir(), build.src_subdir.as_deref());
    let work_dir = if ctx.sources_copied {
        script_dir.clone()
    } else {
        ctx.build_dir.clone()
    };
    tracing::info!("Building in {}", work_dir.display());

    if build.run_autogen {
        runner.run(&ctx.command(&["./autogen.sh"], &script_dir)?)?;
    }
    if build.run_autoreconf {
        runner.run(&ctx.command(&["autoreconf", "-i"], &script_dir)?)?;
    }

    let configure = if build.configure_cmd.contains('/') && !ctx.sources_copied {
        script_dir.join(&build.configure_cmd).to_string_lossy().into_owned()
    } else {
        build.configure_cmd.clone()
    };
    let mut configure_args = vec![configure, format!("--prefix={}", ctx.prefix.display())];
    configure_args.extend(build.args.iter().cloned());
    runner.run(&ctx.command(&configure_args, &work_dir)?)?;

    runner.run(&ctx.command(&["make".to_string(), format!("-j{}", ctx.jobs)], &work_dir)?)?;
    if !build.install_targets.is_empty() {
        let mut install = vec!["make".to_string()];
        install.extend(build.install_targets.iter().cloned());
        runner.run(&ctx.command(&install, &work_dir)?)?;
    }
    Ok(())
}

/// Flags every CMake build gets.
pub fn common_cmake_args(ctx: &BuildContext) -> Vec<String> {
    vec![
        format!("-DCMAKE_C_FLAGS={}", ctx.env.c_flags.join(" ")),
        format!("-DCMAKE_CXX_FLAGS={}", ctx.env.cxx_flags.join(" ")),
        format!("-DCMAKE_SHARED_LINKER_FLAGS={}", ctx.env.ld_flags.join(" ")),
        format!("-DCMAKE_EXE_LINKER_FLAGS={}", ctx.env.exe_ld_flags.join(" ")),
        "-DCMAKE_EXPORT_COMPILE_COMMANDS=ON".to_string(),
        format!("-DCMAKE_INSTALL_PREFIX={}", ctx.prefix.display()),
        "-DCMAKE_POSITION_INDEPENDENT_CODE=ON".to_string(),
    ]
}

fn build_with_cmake(ctx: &BuildContext, build: &CMakeBuild, runner: &dyn CommandRunner) -> Result<()> {
    let build_tool = if build.use_ninja && find_executable("ninja").is_some() {
        "ninja"
    } else {
        "make"
    };
    tracing::info!(
        "Building {} using CMake, build tool: {}",
        ctx.dependency,
        build_tool
    );

    let src = subdir(ctx.build_source_dir(), build.src_subdir.as_deref());
    let mut args = vec!["cmake".to_string(), src.to_string_lossy().into_owned()];
    if build_tool == "ninja" {
        args.extend(["-G".to_string(), "Ninja".to_string()]);
    }
    args.extend(common_cmake_args(ctx));
    args.extend(ctx.expand_all(&build.args));

    let mentions_shared_libs = args.iter().any(|a| a.starts_with("-DBUILD_SHARED_LIBS="));
    if build.shared_and_static && mentions_shared_libs {
        return Err(StrategyError::SharedLibsConflict { args }.into());
    }
    if !build.shared_and_static && !args.iter().any(|a| a == "-DBUILD_SHARED_LIBS=OFF") {
        args.push("-DBUILD_SHARED_LIBS=ON".to_string());
    }

    let build_once = |dir: &Path, extra: Option<&str>| -> Result<()> {
        ensure_dir(dir)?;
        remove_path(&dir.join("CMakeCache.txt"))?;
        remove_path(&dir.join("CMakeFiles"))?;

        let mut cmake_args = args.clone();
        cmake_args.extend(extra.map(str::to_string));
        tracing::debug!(
            "CMake command line (one argument per line):\n{}",
            cmake_args
                .iter()
                .map(|a| format!("    {a}"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        runner.run(&ctx.command(&cmake_args, dir)?)?;
        runner.run(&ctx.command(&[build_tool.to_string(), format!("-j{}", ctx.jobs)], dir)?)?;
        if !build.install_targets.is_empty() {
            let mut install = vec![build_tool.to_string()];
            install.extend(build.install_targets.iter().cloned());
            runner.run(&ctx.command(&install, dir)?)?;
        }
        check_compile_commands(&dir.join("compile_commands.json"), ctx.variant)
    };

    if build.shared_and_static {
        for (value, name) in [("ON", "shared"), ("OFF", "static")] {
            let arg = format!("-DBUILD_SHARED_LIBS={value}");
            tracing::info!(
                "Building {} ({}) with option: {}",
                ctx.dependency,
                ctx.variant,
                arg
            );
            build_once(&ctx.build_dir.join(name), Some(&arg))?;
        }
        Ok(())
    } else {
        build_once(&ctx.build_dir, None)
    }
}

fn build_with_commands(
    ctx: &BuildContext,
    build: &CustomBuild,
    runner: &dyn CommandRunner,
) -> Result<()> {
    for argv in &build.commands {
        runner.run(&ctx.command(argv, &ctx.build_dir)?)?;
    }
    Ok(())
}

fn subdir(base: &Path, name: Option<&str>) -> PathBuf {
    match name {
        Some(name) => base.join(name),
        None => base.to_path_buf(),
    }
}

#[derive(Deserialize)]
struct CompileCommand {
    command: Option<String>,
    arguments: Option<Vec<String>>,
}

/// Every compile command of a sanitizer build must carry the sanitizer
/// flags, otherwise the dependency silently built uninstrumented.
pub fn check_compile_commands(path: &Path, variant: BuildVariant) -> Result<()> {
    let required: &[&str] = match variant {
        BuildVariant::Asan => &ASAN_FLAGS[..2],
        BuildVariant::Tsan => &TSAN_FLAGS[..1],
        _ => return Ok(()),
    };

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let commands: Vec<CompileCommand> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    for item in commands {
        let args: Vec<String> = match (item.arguments, item.command) {
            (Some(arguments), _) => arguments,
            (None, Some(command)) => command.split_whitespace().map(str::to_string).collect(),
            (None, None) => continue,
        };
        for flag in required {
            if !args.iter().any(|a| a == flag) {
                return Err(StrategyError::SanitizerFlagMissing {
                    file: path.to_path_buf(),
                    flag: flag.to_string(),
                    command: args.join(" "),
                }
                .into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_context, RecordingRunner};
    use tempfile::TempDir;

    fn argv(cmd: &crate::test_support::RecordedCommand) -> Vec<String> {
        let mut argv = vec![cmd.program.clone()];
        argv.extend(cmd.args.iter().cloned());
        argv
    }

    #[test]
    fn test_configure_sequence() {
        let tmp = TempDir::new().unwrap();
        let ctx = build_context(tmp.path(), "libevent", BuildVariant::Uninstrumented);
        let runner = RecordingRunner::new();
        let build = ConfigureBuild {
            run_autoreconf: true,
            args: vec!["--disable-openssl".to_string(), "--libdir={prefix_lib}".to_string()],
            ..ConfigureBuild::default()
        };

        run_strategy(&ctx, &BuildStrategy::Configure(build), &runner).unwrap();

        let commands = runner.commands();
        let argvs: Vec<Vec<String>> = commands.iter().map(argv).collect();
        assert_eq!(argvs[0], ["autoreconf", "-i"]);
        assert_eq!(commands[0].cwd.as_deref(), Some(ctx.source_dir.as_path()));
        assert_eq!(
            argvs[1],
            [
                ctx.source_dir.join("./configure").to_string_lossy().into_owned(),
                format!("--prefix={}", ctx.prefix.display()),
                "--disable-openssl".to_string(),
                format!("--libdir={}", ctx.prefix_lib().display()),
            ]
        );
        assert_eq!(commands[1].cwd.as_deref(), Some(ctx.build_dir.as_path()));
        assert_eq!(argvs[2], ["make", "-j4"]);
        assert_eq!(argvs[3], ["make", "install"]);
        assert_eq!(commands[3].env["THIRDPARTY_BUILD"], "1");
    }

    #[test]
    fn test_configure_in_copied_sources() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = build_context(tmp.path(), "libevent", BuildVariant::Common);
        ctx.sources_copied = true;
        let runner = RecordingRunner::new();
        let build = ConfigureBuild {
            src_subdir: Some("unix".to_string()),
            install_targets: vec![],
            ..ConfigureBuild::default()
        };

        run_strategy(&ctx, &BuildStrategy::Configure(build), &runner).unwrap();

        let commands = runner.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].program, "./configure");
        assert_eq!(commands[0].cwd, Some(ctx.build_dir.join("unix")));
    }

    #[test]
    fn test_cmake_args() {
        let tmp = TempDir::new().unwrap();
        let ctx = build_context(tmp.path(), "gflags", BuildVariant::Common);
        let runner = RecordingRunner::new();
        let build = CMakeBuild {
            args: vec!["-DGFLAGS_NAMESPACE=google".to_string()],
            ..CMakeBuild::default()
        };
        std::fs::create_dir_all(ctx.build_dir.join("CMakeFiles")).unwrap();
        std::fs::write(ctx.build_dir.join("CMakeCache.txt"), "stale").unwrap();

        run_strategy(&ctx, &BuildStrategy::CMake(build), &runner).unwrap();

        assert!(!ctx.build_dir.join("CMakeCache.txt").exists());
        assert!(!ctx.build_dir.join("CMakeFiles").exists());

        let commands = runner.commands();
        let cmake = &commands[0];
        assert_eq!(cmake.program, "cmake");
        assert_eq!(cmake.args[0], ctx.source_dir.to_string_lossy());
        assert!(cmake.args.contains(&"-DCMAKE_EXPORT_COMPILE_COMMANDS=ON".to_string()));
        assert!(cmake
            .args
            .contains(&format!("-DCMAKE_INSTALL_PREFIX={}", ctx.prefix.display())));
        assert!(cmake.args.contains(&"-DGFLAGS_NAMESPACE=google".to_string()));
        assert_eq!(cmake.args.last().map(String::as_str), Some("-DBUILD_SHARED_LIBS=ON"));
        assert_eq!(argv(&commands[1]), ["make", "-j4"]);
        assert_eq!(argv(&commands[2]), ["make", "install"]);
    }

    #[test]
    fn test_cmake_respects_static_only() {
        let tmp = TempDir::new().unwrap();
        let ctx = build_context(tmp.path(), "snappy", BuildVariant::Common);
        let runner = RecordingRunner::new();
        let build = CMakeBuild {
            args: vec!["-DBUILD_SHARED_LIBS=OFF".to_string()],
            ..CMakeBuild::default()
        };
        run_strategy(&ctx, &BuildStrategy::CMake(build), &runner).unwrap();
        let cmake = &runner.commands()[0];
        assert!(!cmake.args.contains(&"-DBUILD_SHARED_LIBS=ON".to_string()));
    }

    #[test]
    fn test_cmake_shared_and_static() {
        let tmp = TempDir::new().unwrap();
        let ctx = build_context(tmp.path(), "gflags", BuildVariant::Common);
        let runner = RecordingRunner::new();
        let build = CMakeBuild {
            shared_and_static: true,
            ..CMakeBuild::default()
        };
        run_strategy(&ctx, &BuildStrategy::CMake(build), &runner).unwrap();

        let commands = runner.commands();
        assert_eq!(commands.len(), 6);
        assert_eq!(commands[0].cwd, Some(ctx.build_dir.join("shared")));
        assert_eq!(commands[0].args.last().map(String::as_str), Some("-DBUILD_SHARED_LIBS=ON"));
        assert_eq!(commands[3].cwd, Some(ctx.build_dir.join("static")));
        assert_eq!(commands[3].args.last().map(String::as_str), Some("-DBUILD_SHARED_LIBS=OFF"));
    }

    #[test]
    fn test_cmake_shared_and_static_conflict() {
        let tmp = TempDir::new().unwrap();
        let ctx = build_context(tmp.path(), "gflags", BuildVariant::Common);
        let build = CMakeBuild {
            shared_and_static: true,
            args: vec!["-DBUILD_SHARED_LIBS=ON".to_string()],
            ..CMakeBuild::default()
        };
        let err = run_strategy(&ctx, &BuildStrategy::CMake(build), &RecordingRunner::new())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StrategyError>(),
            Some(StrategyError::SharedLibsConflict { .. })
        ));
    }

    #[test]
    fn test_compile_commands_check() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("compile_commands.json");
        std::fs::write(
            &path,
            r#"[{"directory": "/b", "file": "a.c",
                 "command": "clang -fsanitize=address -fsanitize=undefined -c a.c"}]"#,
        )
        .unwrap();
        check_compile_commands(&path, BuildVariant::Asan).unwrap();

        let err = check_compile_commands(&path, BuildVariant::Tsan).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StrategyError>(),
            Some(StrategyError::SanitizerFlagMissing { flag, .. }) if flag == "-fsanitize=thread"
        ));

        // Plain variants never look at the file.
        check_compile_commands(&tmp.path().join("missing.json"), BuildVariant::Common).unwrap();
    }

    #[test]
    fn test_custom_commands_expand_placeholders() {
        let tmp = TempDir::new().unwrap();
        let mut ctx = build_context(tmp.path(), "boost", BuildVariant::Common);
        ctx.env.cxx_flags = vec!["-O2".to_string(), "-std=c++14".to_string()];
        let runner = RecordingRunner::new();
        let build = CustomBuild {
            commands: vec![vec![
                "./b2".to_string(),
                "--prefix={prefix}".to_string(),
                "cxxflags={cxxflags}".to_string(),
                "-j{jobs}".to_string(),
            ]],
        };
        run_strategy(&ctx, &BuildStrategy::Custom(build), &runner).unwrap();

        let commands = runner.commands();
        assert_eq!(
            commands[0].args,
            [
                format!("--prefix={}", ctx.prefix.display()),
                "cxxflags=-O2 -std=c++14".to_string(),
                "-j4".to_string(),
            ]
        );
        assert_eq!(commands[0].cwd.as_deref(), Some(ctx.build_dir.as_path()));
    }
}
