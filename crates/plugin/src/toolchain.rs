//! Cargo invocation for building plugin libraries.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command as TokioCommand;

use crate::error::{BuildError, PluginError, Result};

/// The build toolchain used to compile plugins.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Resolved path of the `cargo` executable.
    cargo: PathBuf,
}

/// A single `cdylib` build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Package manifest of the plugin.
    pub manifest_path: PathBuf,

    /// Working directory for the build (the plugin directory).
    pub working_dir: PathBuf,

    /// Cargo target directory for this plugin.
    pub target_dir: PathBuf,

    /// Build with the release profile.
    pub release: bool,
}

/// Result of a build invocation.
#[derive(Debug)]
pub struct BuildOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,

    /// Dynamic libraries reported by cargo.
    pub libraries: Vec<PathBuf>,
}

impl BuildOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The subset of cargo's JSON messages we read.
#[derive(Debug, Deserialize)]
struct CargoMessage {
    reason: String,

    #[serde(default)]
    target: Option<CargoTarget>,

    #[serde(default)]
    filenames: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct CargoTarget {
    kind: Vec<String>,
}

impl Toolchain {
    /// Locates `program` (a name on `PATH` or a path).
    pub fn locate(program: impl AsRef<OsStr>) -> Result<Self> {
        let program = program.as_ref();
        let cargo = which::which(program).map_err(|source| PluginError::ToolchainNotFound {
            program: program.to_string_lossy().to_string(),
            source,
        })?;

        Ok(Self { cargo })
    }

    /// Path of the resolved executable.
    pub fn path(&self) -> &Path {
        &self.cargo
    }

    /// Builds the library target of a plugin package as a dynamic library.
    pub async fn build_cdylib(
        &self,
        request: &BuildRequest,
    ) -> std::result::Result<BuildOutput, BuildError> {
        let args = Self::build_args(request);

        let output = TokioCommand::new(&self.cargo)
            .args(&args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BuildError::Spawn(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let libraries = dynamic_libraries(&stdout);

        Ok(BuildOutput {
            exit_code: output.status.code(),
            stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            libraries,
        })
    }

    /// Returns the cargo arguments for a build request.
    fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--lib".to_string(),
            "--message-format=json-render-diagnostics".to_string(),
            "--manifest-path".to_string(),
            request.manifest_path.to_string_lossy().to_string(),
            "--target-dir".to_string(),
            request.target_dir.to_string_lossy().to_string(),
        ];

        if request.release {
            args.push("--release".to_string());
        }

        args
    }
}

/// Extracts dynamic library paths from cargo's JSON message stream.
fn dynamic_libraries(stdout: &str) -> Vec<PathBuf> {
    stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<CargoMessage>(line).ok())
        .filter(|message| message.reason == "compiler-artifact")
        .filter(|message| {
            message
                .target
                .as_ref()
                .is_some_and(|target| target.kind.iter().any(|kind| kind == "cdylib"))
        })
        .flat_map(|message| message.filenames)
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
        })
        .collect()
}
