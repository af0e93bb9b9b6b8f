//! Implementation of `build-thirdparty`.
//!
//! Variants are built strictly in order, `common` first, because every later
//! variant compiles and links against what `common` installed. Within a
//! variant every selected dependency of the matching build group is checked
//! against its build stamp and rebuilt only when the stamp changed.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use thiserror::Error;

use crate::audit::{AuditReport, Auditor, LibraryAllowlist, LinkInspector};
use crate::builder::context::BuildContext;
use crate::builder::environment::EnvironmentComposer;
use crate::builder::stamp::StampEngine;
use crate::builder::strategy::run_strategy;
use crate::builder::toolchain::{ActiveToolchain, CompilerWrappers, ToolchainOptions, ToolchainResolver};
use crate::core::{BuildVariant, DependencyDescriptor, Platform, Registry};
use crate::ops::clean::clean;
use crate::sources::{ChecksumRegistry, DownloadManager, Downloader, FetchPipeline};
use crate::util::config::{ThirdpartyConfig, ToolchainConfig};
use crate::util::fs::{ensure_dir, remove_path, symlink, sync_dir};
use crate::util::layout::FileSystemLayout;
use crate::util::process::CommandRunner;

const SEPARATOR: &str =
    "----------------------------------------------------------------------------------------------";

/// A dependency build failed; the whole run stops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to build {dependency} ({variant})")]
pub struct BuildFailure {
    pub dependency: String,
    pub variant: BuildVariant,
}

/// Options for a third-party build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Build only this variant (plus `common`)
    pub build_type: Option<BuildVariant>,

    /// Dependencies to build (empty = all)
    pub dependencies: Vec<String>,

    /// Dependencies to leave out
    pub skip: Vec<String>,

    /// Remove previous build output of the selected dependencies first
    pub clean: bool,

    pub skip_sanitizers: bool,

    /// Record checksums of unknown archives
    pub add_checksum: bool,

    /// Fetch and patch sources only
    pub download_extract_only: bool,

    /// Make parallelism
    pub jobs: usize,

    pub toolchain: ToolchainOptions,

    /// Compiler wrapper binary; located automatically when unset
    pub compiler_wrapper_exe: Option<PathBuf>,
}

/// What a run did.
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub variants: Vec<BuildVariant>,
    pub built: Vec<(String, BuildVariant)>,
    pub up_to_date: Vec<(String, BuildVariant)>,

    /// `None` with `--download-extract-only`
    pub audit: Option<AuditReport>,
}

/// Fill toolchain options the command line left unset from
/// `thirdparty.toml`.
pub fn merge_toolchain_options(
    mut options: ToolchainOptions,
    config: &ToolchainConfig,
    root: &Path,
) -> ToolchainOptions {
    if options.compiler_prefix.is_none() {
        options.compiler_prefix = config.compiler_prefix.clone();
    }
    if options.compiler_suffix.is_empty() {
        options.compiler_suffix = config.compiler_suffix.clone().unwrap_or_default();
    }
    if options.gcc_candidate_roots.is_empty() {
        options.gcc_candidate_roots = config
            .gcc_candidate_roots
            .iter()
            .map(|r| root.join(r))
            .collect();
    }
    if options.clang_candidate_roots.is_empty() {
        options.clang_candidate_roots = config
            .clang_candidate_roots
            .iter()
            .map(|r| root.join(r))
            .collect();
    }
    options
}

/// Variants this run builds, in build order.
pub fn plan_variants(
    platform: Platform,
    resolver: &ToolchainResolver,
    options: &BuildOptions,
) -> Vec<BuildVariant> {
    let linux = platform == Platform::Linux;
    let mut variants = vec![BuildVariant::Common];
    if linux {
        variants.push(BuildVariant::Uninstrumented);
    }
    if resolver.use_only_gcc() {
        if linux && !options.skip_sanitizers {
            variants.push(BuildVariant::Asan);
        }
    } else {
        variants.push(BuildVariant::ClangUninstrumented);
        if linux && !options.skip_sanitizers {
            variants.push(BuildVariant::Asan);
            variants.push(BuildVariant::Tsan);
        }
    }

    if let Some(only) = options.build_type {
        for variant in &variants {
            if *variant != BuildVariant::Common && *variant != only {
                tracing::info!(
                    "Skipping build type {} because build type {} is specified in the arguments",
                    variant,
                    only
                );
            }
        }
        variants.retain(|v| *v == BuildVariant::Common || *v == only);
    }
    tracing::info!(
        "Full list of build types: {}",
        variants
            .iter()
            .map(|v| v.dir_name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    variants
}

/// Create `lib`/`include` under each variant's prefix and its private
/// libc++ prefix, with `lib64` as a relative symlink to `lib`.
pub fn prepare_out_dirs(layout: &FileSystemLayout, variants: &[BuildVariant]) -> Result<()> {
    for &variant in variants {
        for dir in [layout.prefix(variant), layout.libcxx_prefix(variant)] {
            ensure_dir(&dir.join("lib"))?;
            ensure_dir(&dir.join("include"))?;

            let lib64 = dir.join("lib64");
            if lib64.is_symlink() {
                continue;
            }
            if lib64.exists() {
                remove_path(&lib64)?;
            }
            symlink(Path::new("lib"), &lib64)
                .with_context(|| format!("failed to create symlink: {}", lib64.display()))?;
        }
    }
    Ok(())
}

/// `PATH` with the `common` variant's `bin` directory first, so tools
/// installed there are found by later builds.
fn path_with_common_bin(layout: &FileSystemLayout) -> Option<String> {
    let mut paths = vec![layout.common_prefix().join("bin")];
    if let Some(current) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&current));
    }
    std::env::join_paths(paths)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

/// Drives a full build over the external seams it is given.
pub struct Orchestrator<'a> {
    layout: &'a FileSystemLayout,
    config: &'a ThirdpartyConfig,
    registry: &'a Registry,
    platform: Platform,
    options: &'a BuildOptions,
    downloader: &'a dyn Downloader,
    runner: &'a dyn CommandRunner,
    inspector: &'a dyn LinkInspector,
}

/// Per-run services shared by every dependency build.
struct Services<'s> {
    fetch: FetchPipeline<'s>,
    stamps: StampEngine,
    composer: EnvironmentComposer,
}

impl<'a> Orchestrator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        layout: &'a FileSystemLayout,
        config: &'a ThirdpartyConfig,
        registry: &'a Registry,
        platform: Platform,
        options: &'a BuildOptions,
        downloader: &'a dyn Downloader,
        runner: &'a dyn CommandRunner,
        inspector: &'a dyn LinkInspector,
    ) -> Self {
        Orchestrator {
            layout,
            config,
            registry,
            platform,
            options,
            downloader,
            runner,
            inspector,
        }
    }

    pub fn run(&self) -> Result<BuildOutcome> {
        let selected = self
            .registry
            .select(&self.options.dependencies, &self.options.skip)?;
        if !self.options.skip.is_empty() {
            tracing::info!("Skipping dependencies: {}", self.options.skip.join(", "));
        }

        let resolver = ToolchainResolver::new(self.options.toolchain.clone(), self.platform)?;
        let variants = plan_variants(self.platform, &resolver, self.options);

        if self.options.clean {
            clean(self.layout, &selected)?;
        }
        prepare_out_dirs(self.layout, &variants)?;

        let checksums =
            ChecksumRegistry::load(&self.layout.checksum_file(), self.options.add_checksum)?;
        let downloads = DownloadManager::new(
            &checksums,
            self.downloader,
            self.config.download.retry_policy()?,
        )
        .with_mirror(self.config.download.mirror_url_prefix.clone())
        .with_add_checksum(self.options.add_checksum);

        let services = Services {
            fetch: FetchPipeline::new(self.layout, &downloads, self.runner),
            stamps: StampEngine::new(self.layout.clone(), &self.config.stamp.driver_files),
            composer: EnvironmentComposer::new(self.layout.clone(), self.platform),
        };

        let mut outcome = BuildOutcome {
            variants: variants.clone(),
            ..BuildOutcome::default()
        };

        if self.options.download_extract_only {
            for &variant in &variants {
                for dep in selected.iter().filter(|d| d.participates(self.platform, variant)) {
                    services.fetch.ensure_fetched(dep)?;
                    tracing::info!(
                        "Skipping build of dependency {}, build type {}, --download-extract-only is specified.",
                        dep.name,
                        variant
                    );
                }
            }
            return Ok(outcome);
        }

        let wrappers = if self.options.toolchain.use_compiler_wrapper {
            let exe = match &self.options.compiler_wrapper_exe {
                Some(exe) => exe.clone(),
                None => CompilerWrappers::locate_wrapper_exe()?,
            };
            Some(CompilerWrappers::install(self.layout, &exe)?)
        } else {
            None
        };

        let mut allowed_lib_dirs = BTreeSet::new();
        for &variant in &variants {
            let family = resolver.family_for(variant);
            tracing::info!("{}", SEPARATOR);
            tracing::info!(
                "Building {} dependencies (compiler type: {})",
                variant,
                family
            );
            tracing::info!("{}", SEPARATOR);
            let toolchain = resolver.set_active(family, wrappers.as_ref())?;

            for dep in selected.iter().filter(|d| d.participates(self.platform, variant)) {
                let key = (dep.name.clone(), variant);
                if !services.stamps.should_rebuild(dep, variant)? {
                    tracing::info!("{} ({}) is up to date", dep.name, variant);
                    outcome.up_to_date.push(key);
                    continue;
                }

                let dirs = self
                    .build_dependency(&services, dep, variant, &toolchain)
                    .map_err(|e| {
                        e.context(BuildFailure {
                            dependency: dep.name.clone(),
                            variant,
                        })
                    })?;
                allowed_lib_dirs.extend(dirs);
                outcome.built.push(key);
            }
        }

        let mut allowlist = LibraryAllowlist::for_platform(self.platform, self.layout.root())?;
        for pattern in &self.config.audit.extra_allowed_patterns {
            allowlist.allow_pattern(pattern)?;
        }
        for dir in &allowed_lib_dirs {
            allowlist.allow_lib_dir(dir)?;
        }
        // Every installed prefix is audited, including ones this run did not
        // build, so stale output from earlier runs is still checked.
        let auditor = Auditor::new(self.layout, self.inspector, allowlist);
        outcome.audit = Some(auditor.run(&BuildVariant::ALL)?);
        Ok(outcome)
    }

    /// Fetch, configure and install one dependency, then commit its stamp.
    /// Returns the library directories its flags added to the run path.
    fn build_dependency(
        &self,
        services: &Services<'_>,
        dep: &DependencyDescriptor,
        variant: BuildVariant,
        toolchain: &ActiveToolchain,
    ) -> Result<BTreeSet<PathBuf>> {
        tracing::info!("{}", SEPARATOR);
        tracing::info!("Building {} ({})", dep.name, variant);
        tracing::info!("{}", SEPARATOR);

        let source_dir = services.fetch.ensure_fetched(dep)?;
        if !source_dir.is_dir() {
            bail!("directory {} does not exist", source_dir.display());
        }

        let mut env = services
            .composer
            .compose(variant, toolchain.spec.family, dep);
        if let Some(path) = path_with_common_bin(self.layout) {
            env.extra_env.insert("PATH".to_string(), path);
        }

        let build_dir = self.layout.dependency_build_dir(variant, &dep.name);
        ensure_dir(&build_dir)?;
        if dep.copy_sources {
            tracing::info!(
                "Bootstrapping {} from {}",
                build_dir.display(),
                source_dir.display()
            );
            sync_dir(&source_dir, &build_dir)?;
        }

        let ctx = BuildContext {
            dependency: dep.name.clone(),
            variant,
            platform: self.platform,
            source_dir,
            build_dir,
            sources_copied: dep.copy_sources,
            prefix: self.layout.prefix(variant),
            common_prefix: self.layout.common_prefix(),
            toolchain: toolchain.clone(),
            env,
            jobs: self.options.jobs,
        };
        ctx.write_env_dump()?;
        run_strategy(&ctx, &dep.build, self.runner)?;

        services.stamps.commit(dep, variant)?;
        tracing::info!("Finished building {} ({})", dep.name, variant);
        Ok(ctx.env.allowed_lib_dirs)
    }
}
