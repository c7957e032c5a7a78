//! Compiles plugin source directories into dynamic libraries.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::descriptor::ExtensionDescriptor;
use crate::error::{BuildError, CompileFailure, CompileFailures, PluginError, Result};
use crate::toolchain::{BuildRequest, Toolchain};

/// Directory under the output root holding per-plugin cargo target dirs.
const BUILD_DIR: &str = ".build";

/// Compiles every plugin under a source root.
pub struct PluginCompiler {
    /// Directory with one sub-directory per plugin.
    source_root: PathBuf,

    /// Directory artifacts are written to.
    output_root: PathBuf,

    /// Toolchain executable name or path.
    program: PathBuf,

    /// Build with the release profile.
    release: bool,

    /// Maximum number of concurrent builds.
    max_parallelism: usize,
}

/// Outcome of a compilation batch.
#[derive(Debug, Default)]
pub struct CompileReport {
    /// Plugins that were attempted, in name order.
    pub descriptors: Vec<ExtensionDescriptor>,

    /// Directories skipped for holding no Rust sources.
    pub skipped: Vec<String>,
}

impl CompileReport {
    /// Number of plugins that produced an artifact.
    pub fn compiled_count(&self) -> usize {
        self.descriptors.iter().filter(|d| d.compiled).count()
    }

    /// Artifacts produced by this batch, in name order.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.descriptors
            .iter()
            .filter(|d| d.compiled)
            .map(|d| d.artifact_path.clone())
            .collect()
    }

    /// Every failed plugin, or `None` if all attempted plugins compiled.
    pub fn failures(&self) -> Option<CompileFailures> {
        let failures: Vec<CompileFailure> = self
            .descriptors
            .iter()
            .filter_map(|d| {
                d.compile_error.as_ref().map(|error| CompileFailure {
                    name: d.name.clone(),
                    error: error.clone(),
                })
            })
            .collect();

        if failures.is_empty() {
            None
        } else {
            Some(CompileFailures { failures })
        }
    }
}

impl PluginCompiler {
    /// Creates a compiler reading from `source_root` and writing to `output_root`.
    pub fn new(source_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            output_root: output_root.into(),
            program: PathBuf::from("cargo"),
            release: true,
            max_parallelism: num_cpus::get(),
        }
    }

    /// Uses a specific toolchain executable instead of `cargo` on `PATH`.
    pub fn with_toolchain(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Selects the release (default) or dev profile.
    pub fn with_release(mut self, release: bool) -> Self {
        self.release = release;
        self
    }

    /// Sets the maximum number of concurrent builds.
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max.max(1);
        self
    }

    /// Compiles every plugin directory.
    ///
    /// Fails outright only when the toolchain is missing or a root directory
    /// is unusable. Per-plugin build failures are recorded in the report and
    /// never stop the remaining plugins from being attempted.
    pub async fn compile_all(&self) -> Result<CompileReport> {
        info!(
            source = %self.source_root.display(),
            output = %self.output_root.display(),
            "Starting plugin compilation"
        );

        let toolchain = Arc::new(Toolchain::locate(&self.program)?);
        debug!(path = %toolchain.path().display(), "Found build toolchain");

        let source_root = self.source_root.clone();
        let output_root = self.output_root.clone();
        let (output_root, mut report) =
            tokio::task::spawn_blocking(move || discover(&source_root, &output_root)).await??;

        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let mut builds = JoinSet::new();

        for (index, descriptor) in report.descriptors.iter().enumerate() {
            let toolchain = Arc::clone(&toolchain);
            let semaphore = Arc::clone(&semaphore);
            let descriptor = descriptor.clone();
            let request = BuildRequest {
                manifest_path: descriptor.manifest_path(),
                working_dir: descriptor.source_path.clone(),
                target_dir: output_root.join(BUILD_DIR).join(&descriptor.name),
                release: self.release,
            };

            builds.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                info!(
                    name = %descriptor.name,
                    source = %descriptor.source_path.display(),
                    output = %descriptor.artifact_path.display(),
                    "Compiling plugin"
                );
                (index, build_one(&toolchain, &request, &descriptor).await)
            });
        }

        let mut outcomes: Vec<Option<std::result::Result<(), BuildError>>> =
            vec![None; report.descriptors.len()];
        while let Some(joined) = builds.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => warn!(error = %e, "Plugin build task did not complete"),
            }
        }

        for (descriptor, outcome) in report.descriptors.iter_mut().zip(outcomes) {
            let outcome =
                outcome.unwrap_or_else(|| Err(BuildError::Aborted(descriptor.name.clone())));
            match &outcome {
                Ok(()) => info!(
                    name = %descriptor.name,
                    output = %descriptor.artifact_path.display(),
                    "Successfully compiled plugin"
                ),
                Err(e) => error!(name = %descriptor.name, error = %e, "Plugin compilation failed"),
            }
            descriptor.record(outcome);
        }

        info!(
            compiled = report.compiled_count(),
            skipped = report.skipped.len(),
            errors = report.descriptors.len() - report.compiled_count(),
            "Plugin compilation finished"
        );

        Ok(report)
    }
}

/// Lists the plugin directories under `source_root` and prepares `output_root`.
///
/// Runs on a blocking thread.
fn discover(source_root: &Path, output_root: &Path) -> Result<(PathBuf, CompileReport)> {
    let candidates = candidates(source_root)?;
    let output_dir = |source: std::io::Error| PluginError::OutputDir {
        path: output_root.to_path_buf(),
        source,
    };
    let output_root = std::path::absolute(output_root).map_err(output_dir)?;
    fs::create_dir_all(&output_root).map_err(output_dir)?;

    let mut report = CompileReport::default();
    for (name, source_path) in candidates {
        let descriptor = ExtensionDescriptor::new(name, source_path, &output_root);
        if descriptor.has_sources() {
            report.descriptors.push(descriptor);
        } else {
            debug!(dir = %descriptor.source_path.display(), "No Rust sources, skipping");
            report.skipped.push(descriptor.name);
        }
    }

    Ok((output_root, report))
}

/// Lists candidate plugin directories, sorted by name.
fn candidates(source_root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let unreadable = |source: std::io::Error| PluginError::SourceDirUnreadable {
        path: source_root.to_path_buf(),
        source,
    };

    let absolute = std::path::absolute(source_root).map_err(unreadable)?;
    let entries = fs::read_dir(&absolute).map_err(unreadable)?;

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(unreadable)?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        candidates.push((name, path));
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(candidates)
}

/// Builds one plugin and copies its library to the artifact path.
///
/// The artifact of a previous batch is removed first, so a failed build
/// leaves no library behind.
async fn build_one(
    toolchain: &Toolchain,
    request: &BuildRequest,
    descriptor: &ExtensionDescriptor,
) -> std::result::Result<(), BuildError> {
    remove_stale_artifact(&descriptor.artifact_path).await?;
    let output = toolchain.build_cdylib(request).await?;

    if !output.success() {
        debug!(name = %descriptor.name, stderr = %output.stderr, "Build output");
        return Err(BuildError::Failed {
            code: output.exit_code,
            stderr: output.stderr,
        });
    }

    let library = output.libraries.first().ok_or(BuildError::NoArtifact)?;
    if let Err(e) = tokio::fs::copy(library, &descriptor.artifact_path).await {
        let _ = tokio::fs::remove_file(&descriptor.artifact_path).await;
        return Err(BuildError::Copy {
            path: descriptor.artifact_path.clone(),
            reason: e.to_string(),
        });
    }

    Ok(())
}

async fn remove_stale_artifact(path: &Path) -> std::result::Result<(), BuildError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed previous artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::StaleArtifact {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::artifact_file_name;
    use crate::loader::{ExtensionLoader, NativeLoader};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_toolchain_is_fatal() {
        let dir = tempdir().unwrap();
        let compiler = PluginCompiler::new(dir.path(), dir.path().join("out"))
            .with_toolchain("flightdeck-no-such-toolchain");

        let err = compiler.compile_all().await.unwrap_err();
        assert!(matches!(err, PluginError::ToolchainNotFound { .. }));
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_unreadable_source_root_is_fatal() {
        let dir = tempdir().unwrap();
        let compiler = PluginCompiler::new(dir.path().join("missing"), dir.path().join("out"))
            .with_toolchain(env!("CARGO"));

        let err = compiler.compile_all().await.unwrap_err();
        assert!(matches!(err, PluginError::SourceDirUnreadable { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_directories_without_sources_are_skipped() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("docs")).unwrap();
        fs::write(src.join("docs").join("README.md"), "notes").unwrap();
        fs::write(src.join("stray.rs"), "").unwrap();

        let report = PluginCompiler::new(&src, dir.path().join("out"))
            .with_toolchain(env!("CARGO"))
            .compile_all()
            .await
            .unwrap();

        assert_eq!(report.compiled_count(), 0);
        assert!(report.descriptors.is_empty());
        assert_eq!(report.skipped, vec!["docs".to_string()]);
        assert!(report.failures().is_none());
    }

    fn write_plugin(root: &Path, name: &str, lib_rs: &str) {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(
            dir.join("Cargo.toml"),
            format!(
                "[package]\nname = \"{name}\"\nversion = \"0.1.0\"\nedition = \"2021\"\n\n\
                 [lib]\ncrate-type = [\"cdylib\"]\n\n[workspace]\n"
            ),
        )
        .unwrap();
        fs::write(dir.join("src").join("lib.rs"), lib_rs).unwrap();
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_siblings() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("plugins");
        let out = dir.path().join("out");
        write_plugin(&src, "good", "pub fn answer() -> i32 {\n    42\n}\n");
        write_plugin(&src, "bad", "pub fn answer() -> i32 {\n    42 +\n");
        fs::create_dir_all(src.join("docs")).unwrap();

        let report = PluginCompiler::new(&src, &out)
            .with_toolchain(env!("CARGO"))
            .with_release(false)
            .compile_all()
            .await
            .unwrap();

        assert_eq!(report.compiled_count(), 1);
        assert_eq!(report.skipped, vec!["docs".to_string()]);

        let failures = report.failures().unwrap();
        assert_eq!(failures.names(), vec!["bad"]);
        assert!(failures.to_string().contains("bad"));

        assert!(out.join(artifact_file_name("good")).is_file());
        assert!(!out.join(artifact_file_name("bad")).exists());
        assert!(!out.join(artifact_file_name("docs")).exists());
        assert_eq!(report.artifacts(), vec![out.join(artifact_file_name("good"))]);

        let err = NativeLoader::new()
            .load(&out.join(artifact_file_name("good")))
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::SymbolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_failed_rebuild_removes_previous_artifact() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("plugins");
        let out = dir.path().join("out");
        let artifact = out.join(artifact_file_name("drag"));
        write_plugin(&src, "drag", "pub fn coefficient() -> f64 {\n    0.5\n}\n");

        let compiler = PluginCompiler::new(&src, &out)
            .with_toolchain(env!("CARGO"))
            .with_release(false);

        let first = compiler.compile_all().await.unwrap();
        assert_eq!(first.compiled_count(), 1);
        assert!(artifact.is_file());

        fs::write(
            src.join("drag").join("src").join("lib.rs"),
            "pub fn coefficient() -> f64 {\n    0.5 *\n",
        )
        .unwrap();

        let second = compiler.compile_all().await.unwrap();
        assert_eq!(second.compiled_count(), 0);
        assert_eq!(second.failures().unwrap().names(), vec!["drag"]);
        assert!(second.artifacts().is_empty());
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_remove_stale_artifact() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join(artifact_file_name("wind"));
        fs::write(&artifact, b"old build").unwrap();

        remove_stale_artifact(&artifact).await.unwrap();
        assert!(!artifact.exists());

        // Nothing to remove on a first build.
        remove_stale_artifact(&artifact).await.unwrap();

        fs::create_dir_all(&artifact).unwrap();
        let err = remove_stale_artifact(&artifact).await.unwrap_err();
        assert!(matches!(err, BuildError::StaleArtifact { .. }));
    }

    #[test]
    fn test_report_collects_failures() {
        let out = Path::new("/out");
        let mut good = ExtensionDescriptor::new("good", PathBuf::from("/src/good"), out);
        good.record(Ok(()));
        let mut bad = ExtensionDescriptor::new("bad", PathBuf::from("/src/bad"), out);
        bad.record(Err(BuildError::NoArtifact));

        let report = CompileReport {
            descriptors: vec![bad, good],
            skipped: Vec::new(),
        };

        assert_eq!(report.compiled_count(), 1);
        assert_eq!(report.artifacts().len(), 1);
        assert_eq!(report.failures().unwrap().names(), vec!["bad"]);
    }
}
