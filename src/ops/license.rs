//! License report of the selected dependencies.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::DependencyDescriptor;
use crate::util::fs::write_string;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseEntry {
    pub name: String,
    pub version: String,
    pub license: Option<String>,
    pub url: String,
}

impl LicenseEntry {
    fn from_descriptor(dep: &DependencyDescriptor) -> Self {
        LicenseEntry {
            name: dep.name.clone(),
            version: dep.version.clone(),
            license: dep.license.clone(),
            url: dep.download_url(),
        }
    }
}

pub fn license_entries(dependencies: &[&DependencyDescriptor]) -> Vec<LicenseEntry> {
    dependencies
        .iter()
        .map(|dep| LicenseEntry::from_descriptor(dep))
        .collect()
}

/// Write the report as a pretty-printed JSON array.
pub fn write_license_report(path: &Path, dependencies: &[&DependencyDescriptor]) -> Result<()> {
    let entries = license_entries(dependencies);
    let json =
        serde_json::to_string_pretty(&entries).context("failed to serialize license report")?;
    write_string(path, &format!("{json}\n"))?;
    tracing::info!(
        "Wrote license report for {} dependencies to {}",
        entries.len(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::descriptor;

    #[test]
    fn test_license_report() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut zlib = descriptor("zlib");
        zlib.version = "1.2.13".to_string();
        zlib.url = "https://zlib.net/{name}-{version}.tar.gz".to_string();
        zlib.license = Some("Zlib".to_string());
        let internal = descriptor("internal");

        let path = tmp.path().join("reports/licenses.json");
        write_license_report(&path, &[&zlib, &internal]).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([
                {
                    "name": "zlib",
                    "version": "1.2.13",
                    "license": "Zlib",
                    "url": "https://zlib.net/zlib-1.2.13.tar.gz"
                },
                {
                    "name": "internal",
                    "version": "1.0",
                    "license": null,
                    "url": "mkdir"
                }
            ])
        );
    }
}
