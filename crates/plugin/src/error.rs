//! Plugin error types.

use std::fmt;
use std::path::PathBuf;

use flightdeck_core::{ExtensionError, Hook};
use thiserror::Error;

/// Error type for plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin source root could not be listed.
    #[error("Failed to read plugin source directory {path}")]
    SourceDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Plugin output directory could not be created.
    #[error("Failed to create plugin output directory {path}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Plugin discovery did not run to completion.
    #[error("Plugin discovery task failed")]
    Discovery(#[from] tokio::task::JoinError),

    /// Build toolchain executable not found.
    #[error("Could not find '{program}' executable")]
    ToolchainNotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    /// One or more plugins failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileFailures),

    /// Plugin artifact not found.
    #[error("Plugin not found: {0}")]
    NotFound(PathBuf),

    /// Artifact is not a loadable library.
    #[error("Failed to load plugin from {path}")]
    LoadError {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// Artifact does not export the entry symbol.
    #[error("Plugin {path} does not export '{symbol}'")]
    SymbolNotFound { path: PathBuf, symbol: String },

    /// Exported declaration does not satisfy the extension contract.
    #[error("Plugin {path} does not satisfy the extension contract: {reason}")]
    ContractMismatch { path: PathBuf, reason: String },

    /// Extension initialization failed.
    #[error("Failed to initialize plugin {path}")]
    InitError {
        path: PathBuf,
        #[source]
        source: ExtensionError,
    },

    /// A step hook returned an error.
    #[error("Extension '{extension}' failed in {hook}")]
    HookFailed {
        extension: String,
        hook: Hook,
        #[source]
        source: ExtensionError,
    },

    /// Extension cleanup returned an error.
    #[error("Extension '{extension}' failed to clean up")]
    CleanupFailed {
        extension: String,
        #[source]
        source: ExtensionError,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin operations.
pub type Result<T> = std::result::Result<T, PluginError>;

/// Why a single plugin failed to build.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("failed to run build toolchain: {0}")]
    Spawn(String),

    #[error("build failed ({}): {}", exit_status(.code), summarize(.stderr))]
    Failed { code: Option<i32>, stderr: String },

    #[error("build produced no dynamic library")]
    NoArtifact,

    #[error("failed to remove previous artifact {path}: {reason}")]
    StaleArtifact { path: PathBuf, reason: String },

    #[error("failed to copy artifact to {path}: {reason}")]
    Copy { path: PathBuf, reason: String },

    #[error("build task aborted: {0}")]
    Aborted(String),
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// First compiler error line, or the last non-empty line of stderr.
fn summarize(stderr: &str) -> String {
    let mut lines = stderr.lines().map(str::trim).filter(|l| !l.is_empty());
    let first_error = lines.clone().find(|l| l.starts_with("error"));
    first_error
        .or_else(|| lines.next_back())
        .unwrap_or("no output")
        .to_string()
}

/// A plugin that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    /// Plugin name (its directory name).
    pub name: String,

    /// Underlying build error.
    pub error: BuildError,
}

/// Every plugin that failed during one compilation batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailures {
    pub failures: Vec<CompileFailure>,
}

impl CompileFailures {
    /// Names of the failing plugins.
    pub fn names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.name.as_str()).collect()
    }
}

impl fmt::Display for CompileFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} plugin(s) failed to compile", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; '{}': {}", failure.name, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileFailures {}
