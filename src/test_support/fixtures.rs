//! Test fixtures: third-party roots, archives, fake compilers and git
//! repositories.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use git2::{IndexAddOption, Oid, Repository, Signature};
use tempfile::TempDir;

use crate::builder::context::BuildContext;
use crate::builder::environment::BuildEnvironment;
use crate::builder::toolchain::{ToolchainOptions, ToolchainResolver};
use crate::core::{BuildGroup, BuildStrategy, BuildVariant, DependencyDescriptor, Platform};
use crate::util::layout::{FileSystemLayout, CHECKSUM_FILE};

/// A `mkdir` dependency in the common group with every optional field at
/// its default.
pub fn descriptor(name: &str) -> DependencyDescriptor {
    DependencyDescriptor {
        name: name.to_string(),
        version: "1.0".to_string(),
        url: "mkdir".to_string(),
        build_group: BuildGroup::Common,
        license: None,
        copy_sources: false,
        patches: Vec::new(),
        patch_version: 0,
        patch_strip: 1,
        post_patch: Vec::new(),
        dir_name: None,
        archive_name: None,
        platforms: Vec::new(),
        skip_variants: Vec::new(),
        extra_cflags: Vec::new(),
        extra_cxxflags: Vec::new(),
        extra_ldflags: Vec::new(),
        extra_downloads: Vec::new(),
        provides_cxx_stdlib: false,
        build: BuildStrategy::default(),
    }
}

/// Write `build_definitions/<name>.toml` with `name`, `version = "1.0"` and
/// then `body`.
pub fn write_definition(root: &Path, name: &str, body: &str) -> PathBuf {
    let dir = root.join("build_definitions");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}.toml"));
    fs::write(&path, format!("name = \"{name}\"\nversion = \"1.0\"\n{body}")).unwrap();
    path
}

/// A scratch third-party root with an empty checksum manifest.
pub struct ThirdpartyFixture {
    tmp: TempDir,
}

impl ThirdpartyFixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("build_definitions")).unwrap();
        fs::write(tmp.path().join(CHECKSUM_FILE), "").unwrap();
        ThirdpartyFixture { tmp }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    pub fn layout(&self) -> FileSystemLayout {
        FileSystemLayout::new(self.root())
    }

    /// A gzipped tarball holding `entries` (path, contents).
    pub fn tar_gz_bytes(&self, entries: &[(&str, &str)]) -> Vec<u8> {
        tar_gz(Vec::new(), entries)
    }

    /// Append a line to the checksum manifest.
    pub fn add_checksum(&self, file_name: &str, checksum: &str) {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.root().join(CHECKSUM_FILE))
            .unwrap();
        writeln!(file, "{checksum}  {file_name}").unwrap();
    }

    pub fn add_patch(&self, name: &str, contents: &str) {
        let dir = self.root().join("patches");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), contents).unwrap();
    }
}

fn tar_gz<W: Write>(out: W, entries: &[(&str, &str)]) -> W {
    let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn write_tar_gz(path: &Path, entries: &[(&str, &str)]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    tar_gz(File::create(path).unwrap(), entries);
}

pub fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

/// Create `base/bin/{gcc,g++,clang,clang++}<suffix>` as executable stubs.
pub fn fake_compiler_root(base: &Path, suffix: &str) -> PathBuf {
    let bin = base.join("bin");
    fs::create_dir_all(&bin).unwrap();
    for compiler in ["gcc", "g++", "clang", "clang++"] {
        let path = bin.join(format!("{compiler}{suffix}"));
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }
    base.to_path_buf()
}

/// Toolchain options that find the fake compilers under `root`.
pub fn fake_toolchain_options(root: &Path) -> ToolchainOptions {
    let compilers = fake_compiler_root(&root.join("toolchain"), "");
    ToolchainOptions {
        gcc_candidate_roots: vec![compilers.clone()],
        clang_candidate_roots: vec![compilers],
        ..ToolchainOptions::default()
    }
}

/// A Linux build context for `name` under `root` with fake compilers, an
/// empty environment and four jobs. The source and build directories
/// exist.
pub fn build_context(root: &Path, name: &str, variant: BuildVariant) -> BuildContext {
    let layout = FileSystemLayout::new(root);
    let resolver =
        ToolchainResolver::new(fake_toolchain_options(root), Platform::Linux).unwrap();
    let toolchain = resolver
        .set_active(variant.compiler_family(Platform::Linux), None)
        .unwrap();

    let source_dir = layout.source_dir(&descriptor(name));
    let build_dir = layout.dependency_build_dir(variant, name);
    fs::create_dir_all(&source_dir).unwrap();
    fs::create_dir_all(&build_dir).unwrap();

    BuildContext {
        dependency: name.to_string(),
        variant,
        platform: Platform::Linux,
        source_dir,
        build_dir,
        sources_copied: false,
        prefix: layout.prefix(variant),
        common_prefix: layout.common_prefix(),
        toolchain,
        env: BuildEnvironment::default(),
        jobs: 4,
    }
}

/// `git init` without any commits.
pub fn git_init(path: &Path) -> Repository {
    Repository::init(path).unwrap()
}

/// Stage everything in the work tree and commit it on `HEAD`.
pub fn git_commit_all(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();

    let signature = Signature::now("test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )
    .unwrap()
}
