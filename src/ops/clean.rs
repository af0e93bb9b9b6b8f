//! `--clean`: forget everything previously produced for a set of
//! dependencies.

use anyhow::Result;

use crate::core::{BuildVariant, DependencyDescriptor};
use crate::util::fs::remove_path;
use crate::util::layout::FileSystemLayout;

/// Remove the build directories and stamps of every variant, the extracted
/// source tree and the downloaded archive of each dependency. Installed
/// files are left alone.
pub fn clean(layout: &FileSystemLayout, dependencies: &[&DependencyDescriptor]) -> Result<()> {
    for dep in dependencies {
        tracing::info!("Cleaning {}", dep.name);
        for variant in BuildVariant::ALL {
            remove_path(&layout.dependency_build_dir(variant, &dep.name))?;
            remove_path(&layout.stamp_path(variant, &dep.name))?;
        }
        remove_path(&layout.source_dir(dep))?;
        if !dep.is_mkdir() {
            remove_path(&layout.archive_path(dep)?)?;
        }
    }
    Ok(())
}
