//! Link inspection tools: `ldd` on Linux, `otool -L` on macOS.

use std::path::Path;

use anyhow::Result;

use crate::core::Platform;
use crate::util::process::ProcessBuilder;

/// What a link inspection tool reported for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    /// One line per dynamic dependency
    Output(String),

    /// Not an object file or executable; nothing to check.
    NotAnObject,

    /// The tool itself failed.
    ToolFailed { code: Option<i32>, output: String },
}

/// Seam over the platform's link inspection tool.
pub trait LinkInspector: Send + Sync {
    /// Command line shown in diagnostics.
    fn tool(&self) -> &'static str;

    fn inspect(&self, file: &Path) -> Result<Inspection>;
}

/// The inspector of `platform`.
pub fn inspector_for(platform: Platform) -> Box<dyn LinkInspector> {
    match platform {
        Platform::Linux => Box::new(LddInspector),
        Platform::MacOs => Box::new(OtoolInspector),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LddInspector;

impl LinkInspector for LddInspector {
    fn tool(&self) -> &'static str {
        "ldd"
    }

    fn inspect(&self, file: &Path) -> Result<Inspection> {
        let output = ProcessBuilder::new("ldd")
            .arg(file)
            .env("LC_ALL", "C")
            .exec()?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        // Exit code 1 is how ldd reports files that are not dynamic
        // executables; the output says so and the allowlist accepts it.
        match output.status.code() {
            Some(0) | Some(1) => Ok(Inspection::Output(text)),
            code => Ok(Inspection::ToolFailed { code, output: text }),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OtoolInspector;

impl LinkInspector for OtoolInspector {
    fn tool(&self) -> &'static str {
        "otool -L"
    }

    fn inspect(&self, file: &Path) -> Result<Inspection> {
        let output = ProcessBuilder::new("otool").arg("-L").arg(file).exec()?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        if text.contains("is not an object file") {
            return Ok(Inspection::NotAnObject);
        }
        if !output.status.success() {
            return Ok(Inspection::ToolFailed {
                code: output.status.code(),
                output: text,
            });
        }
        Ok(Inspection::Output(text))
    }
}
