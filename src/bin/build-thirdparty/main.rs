//! build-thirdparty - builds the third-party dependency matrix

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Cli;
use thirdparty::audit::inspector_for;
use thirdparty::builder::ToolchainOptions;
use thirdparty::core::{Platform, Registry};
use thirdparty::ops::{merge_toolchain_options, write_license_report, BuildOptions, Orchestrator};
use thirdparty::sources::HttpDownloader;
use thirdparty::util::{FileSystemLayout, SystemRunner, ThirdpartyConfig};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) if cli.verbose => EnvFilter::new("thirdparty=debug"),
        Err(_) => EnvFilter::new("thirdparty=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let root = thirdparty_root(cli.thirdparty_dir.as_deref())?;
    let layout = FileSystemLayout::new(&root);
    let config = ThirdpartyConfig::load_from_root(&root)?;
    let platform = Platform::host();
    let registry = Registry::load(&layout, &config, platform)?;

    if let Some(report) = &cli.license_report {
        let selected = registry.select(&cli.dependencies, &cli.skip)?;
        return write_license_report(report, &selected);
    }

    let toolchain = merge_toolchain_options(
        ToolchainOptions {
            single_compiler_type: cli.single_compiler_type,
            compiler_prefix: cli.compiler_prefix.clone(),
            compiler_suffix: cli.compiler_suffix.clone().unwrap_or_default(),
            devtoolset: cli.devtoolset,
            use_compiler_wrapper: cli.use_compiler_wrapper || cli.use_ccache,
            use_ccache: cli.use_ccache,
            alternate_root: cli.toolchain_root.clone(),
            ..ToolchainOptions::default()
        },
        &config.toolchain,
        &root,
    );

    let jobs = match cli.make_parallelism {
        Some(0) => bail!("--make-parallelism must be at least 1"),
        Some(jobs) => jobs,
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    };

    let options = BuildOptions {
        build_type: cli.build_type,
        dependencies: cli.dependencies,
        skip: cli.skip,
        clean: cli.clean,
        skip_sanitizers: cli.skip_sanitizers,
        add_checksum: cli.add_checksum,
        download_extract_only: cli.download_extract_only,
        jobs,
        toolchain,
        compiler_wrapper_exe: None,
    };

    let downloader = HttpDownloader::new()?;
    let inspector = inspector_for(platform);
    let outcome = Orchestrator::new(
        &layout,
        &config,
        &registry,
        platform,
        &options,
        &downloader,
        &SystemRunner,
        inspector.as_ref(),
    )
    .run()?;

    tracing::info!(
        "Built {} dependency builds, {} up to date",
        outcome.built.len(),
        outcome.up_to_date.len()
    );
    if let Some(audit) = outcome.audit {
        if !audit.passed() {
            bail!(
                "found problematic library dependencies in {} of {} files",
                audit.failures.len(),
                audit.files_checked
            );
        }
    }
    Ok(())
}

fn thirdparty_root(dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().context("failed to determine the current directory")?,
    };
    dir.canonicalize()
        .with_context(|| format!("third-party directory not found: {}", dir.display()))
}
