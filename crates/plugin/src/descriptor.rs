//! Plugin source directories discovered for compilation.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;

/// One plugin source directory and the artifact it compiles to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDescriptor {
    /// Plugin name (the directory name).
    pub name: String,

    /// Absolute path of the plugin source directory.
    pub source_path: PathBuf,

    /// Absolute path the compiled library is written to.
    pub artifact_path: PathBuf,

    /// Whether the artifact was produced.
    pub compiled: bool,

    /// Why compilation failed, if it did.
    pub compile_error: Option<BuildError>,
}

impl ExtensionDescriptor {
    /// Describes the plugin in `source_path`, compiled into `output_root`.
    pub fn new(name: impl Into<String>, source_path: PathBuf, output_root: &Path) -> Self {
        let name = name.into();
        let artifact_path = output_root.join(artifact_file_name(&name));
        Self {
            name,
            source_path,
            artifact_path,
            compiled: false,
            compile_error: None,
        }
    }

    /// Path of the package manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.source_path.join("Cargo.toml")
    }

    /// Whether the directory holds any Rust source file.
    pub fn has_sources(&self) -> bool {
        contains_rust_sources(&self.source_path)
            || contains_rust_sources(&self.source_path.join("src"))
    }

    /// Records the outcome of the compile step.
    pub(crate) fn record(&mut self, outcome: std::result::Result<(), BuildError>) {
        match outcome {
            Ok(()) => self.compiled = true,
            Err(e) => self.compile_error = Some(e),
        }
    }
}

/// `<name>.<platform library extension>`, e.g. `windeffect.so`.
pub fn artifact_file_name(name: &str) -> String {
    format!("{}.{}", name, std::env::consts::DLL_EXTENSION)
}

/// Checks whether `dir` directly contains a `.rs` file.
fn contains_rust_sources(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };

    entries.flatten().any(|entry| {
        let path = entry.path();
        path.is_file() && path.extension().is_some_and(|ext| ext == "rs")
    })
}
