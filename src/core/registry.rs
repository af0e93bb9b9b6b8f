//! Dependency registry and selection.
//!
//! The registry is the ordered, platform-filtered list of every known
//! dependency. Order comes from `thirdparty.toml` when it lists
//! dependencies, otherwise from the sorted descriptor file names.

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use thiserror::Error;

use crate::core::dependency::DependencyDescriptor;
use crate::core::platform::Platform;
use crate::util::config::ThirdpartyConfig;
use crate::util::layout::FileSystemLayout;

/// Invalid dependency selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("cannot specify both a list of dependencies to build and a list of dependencies to skip")]
    IncludeAndSkip,

    #[error("unknown dependencies: {}", names.join(", "))]
    UnknownDependencies { names: Vec<String> },
}

/// Ordered set of dependency descriptors for one platform.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    dependencies: Vec<DependencyDescriptor>,
}

impl Registry {
    /// Build a registry from descriptors in build order, keeping only those
    /// that exist on `platform`.
    pub fn new(dependencies: Vec<DependencyDescriptor>, platform: Platform) -> Result<Self> {
        let mut seen = HashSet::new();
        for dep in &dependencies {
            if !seen.insert(dep.name.as_str()) {
                bail!("dependency `{}` is defined more than once", dep.name);
            }
        }
        Ok(Registry {
            dependencies: dependencies
                .into_iter()
                .filter(|d| d.exists_on(platform))
                .collect(),
        })
    }

    /// Load every descriptor under `build_definitions/`.
    pub fn load(
        layout: &FileSystemLayout,
        config: &ThirdpartyConfig,
        platform: Platform,
    ) -> Result<Self> {
        let dir = layout.definitions_dir();
        let mut on_disk: Vec<String> = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read build definitions: {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        on_disk.sort();

        let order = if config.registry.dependencies.is_empty() {
            on_disk
        } else {
            for name in &on_disk {
                if !config.registry.dependencies.contains(name) {
                    tracing::warn!(
                        "Build definition `{}` is not listed in registry.dependencies and will be ignored",
                        name
                    );
                }
            }
            config.registry.dependencies.clone()
        };

        let dependencies = order
            .iter()
            .map(|name| DependencyDescriptor::load(&layout.definition_file(name)))
            .collect::<Result<Vec<_>>>()?;

        let registry = Registry::new(dependencies, platform)?;
        tracing::debug!(
            "Loaded {} dependencies for {}: {}",
            registry.len(),
            platform,
            registry.names().join(", ")
        );
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DependencyDescriptor> {
        self.dependencies.iter()
    }

    pub fn get(&self, name: &str) -> Option<&DependencyDescriptor> {
        self.dependencies.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.dependencies.iter().map(|d| d.name.as_str()).collect()
    }

    /// Apply an inclusion list, a skip list, or neither. The result keeps
    /// registry order.
    pub fn select(
        &self,
        include: &[String],
        skip: &[String],
    ) -> Result<Vec<&DependencyDescriptor>, SelectionError> {
        if !include.is_empty() && !skip.is_empty() {
            return Err(SelectionError::IncludeAndSkip);
        }

        let named = if include.is_empty() { skip } else { include };
        let unknown: Vec<String> = named
            .iter()
            .filter(|name| self.get(name).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(SelectionError::UnknownDependencies { names: unknown });
        }

        let selected = self
            .dependencies
            .iter()
            .filter(|d| {
                if !include.is_empty() {
                    include.contains(&d.name)
                } else {
                    !skip.contains(&d.name)
                }
            })
            .collect();
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{descriptor, write_definition, ThirdpartyFixture};

    fn registry() -> Registry {
        Registry::new(
            vec![descriptor("zlib"), descriptor("lz4"), descriptor("openssl")],
            Platform::Linux,
        )
        .unwrap()
    }

    fn names(deps: &[&DependencyDescriptor]) -> Vec<String> {
        deps.iter().map(|d| d.name.clone()).collect()
    }

    #[test]
    fn test_select_all() {
        let reg = registry();
        assert_eq!(names(&reg.select(&[], &[]).unwrap()), ["zlib", "lz4", "openssl"]);
    }

    #[test]
    fn test_select_include_keeps_registry_order() {
        let reg = registry();
        let include = vec!["openssl".to_string(), "zlib".to_string()];
        assert_eq!(names(&reg.select(&include, &[]).unwrap()), ["zlib", "openssl"]);
    }

    #[test]
    fn test_select_skip() {
        let reg = registry();
        let skip = vec!["lz4".to_string()];
        assert_eq!(names(&reg.select(&[], &skip).unwrap()), ["zlib", "openssl"]);
    }

    #[test]
    fn test_select_rejects_include_and_skip() {
        let reg = registry();
        let err = reg
            .select(&["zlib".to_string()], &["lz4".to_string()])
            .unwrap_err();
        assert_eq!(err, SelectionError::IncludeAndSkip);
    }

    #[test]
    fn test_select_rejects_unknown_names() {
        let reg = registry();
        let err = reg.select(&["zlibb".to_string()], &[]).unwrap_err();
        assert_eq!(
            err,
            SelectionError::UnknownDependencies {
                names: vec!["zlibb".to_string()]
            }
        );
        assert!(reg.select(&[], &["nope".to_string()]).is_err());
    }

    #[test]
    fn test_platform_filtering_and_duplicates() {
        let mut mac_only = descriptor("libcxx_mac");
        mac_only.platforms = vec![Platform::MacOs];
        let reg = Registry::new(vec![descriptor("zlib"), mac_only], Platform::Linux).unwrap();
        assert_eq!(reg.names(), ["zlib"]);

        assert!(Registry::new(vec![descriptor("zlib"), descriptor("zlib")], Platform::Linux).is_err());
    }

    #[test]
    fn test_load_orders_by_config_or_name() {
        let fixture = ThirdpartyFixture::new();
        write_definition(fixture.root(), "zlib", "url = \"mkdir\"\n");
        write_definition(fixture.root(), "bison", "url = \"mkdir\"\n");

        let mut config = ThirdpartyConfig::default();
        let reg = Registry::load(&fixture.layout(), &config, Platform::Linux).unwrap();
        assert_eq!(reg.names(), ["bison", "zlib"]);

        config.registry.dependencies = vec!["zlib".to_string(), "bison".to_string()];
        let reg = Registry::load(&fixture.layout(), &config, Platform::Linux).unwrap();
        assert_eq!(reg.names(), ["zlib", "bison"]);

        config.registry.dependencies = vec!["missing".to_string()];
        assert!(Registry::load(&fixture.layout(), &config, Platform::Linux).is_err());
    }
}
