//! Ordered registry of active extensions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flightdeck_core::{Extension, Hook, Logger, PhysicsState, RunSettings};
use tracing::{debug, info, warn};

use crate::error::{PluginError, Result};
use crate::loader::{ExtensionLoader, ModuleHandle};

/// Lifecycle of a loaded extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    /// Constructed, `initialize` not yet called.
    Loaded,

    /// `initialize` succeeded.
    Initialized,
}

/// An extension brought online from an artifact.
struct LoadedExtension {
    name: String,
    version: String,
    artifact: PathBuf,
    state: ExtensionState,
    extension: Box<dyn Extension>,
    _module: ModuleHandle,
}

impl LoadedExtension {
    fn info(&self) -> ExtensionInfo {
        ExtensionInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            artifact: self.artifact.clone(),
            state: self.state,
        }
    }
}

impl fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("artifact", &self.artifact)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Identity of a registered extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionInfo {
    pub name: String,
    pub version: String,
    pub artifact: PathBuf,
    pub state: ExtensionState,
}

/// Extensions in registration order, shared between the lifecycle
/// controller and the physics core.
///
/// Cloning yields another handle to the same registry. Registration order is
/// invocation order.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    extensions: Arc<Mutex<Vec<LoadedExtension>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LoadedExtension>> {
        self.extensions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads, initializes, and appends the extension in `artifact`.
    ///
    /// The extension is only registered once `initialize` succeeded.
    pub fn load_extension(
        &self,
        loader: &dyn ExtensionLoader,
        artifact: &Path,
        logger: &Logger,
        settings: &RunSettings,
    ) -> Result<ExtensionInfo> {
        let module = loader.load(artifact)?;
        let mut loaded = LoadedExtension {
            name: String::new(),
            version: String::new(),
            artifact: artifact.to_path_buf(),
            state: ExtensionState::Loaded,
            extension: module.extension,
            _module: module.handle,
        };

        let stem = artifact
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        loaded
            .extension
            .initialize(logger.named(&stem), settings)
            .map_err(|source| PluginError::InitError {
                path: artifact.to_path_buf(),
                source,
            })?;

        loaded.state = ExtensionState::Initialized;
        loaded.name = loaded.extension.name().to_string();
        loaded.version = loaded.extension.version().to_string();
        info!(
            name = %loaded.name,
            version = %loaded.version,
            artifact = %artifact.display(),
            "Loaded extension"
        );

        let info = loaded.info();
        self.lock().push(loaded);
        Ok(info)
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered extensions in invocation order.
    pub fn extensions(&self) -> Vec<ExtensionInfo> {
        self.lock().iter().map(LoadedExtension::info).collect()
    }

    /// Calls `before_step` on every extension in registration order.
    pub fn invoke_before_step(&self, state: &mut PhysicsState) -> Result<()> {
        self.invoke(Hook::BeforeStep, state)
    }

    /// Calls `after_step` on every extension in registration order.
    pub fn invoke_after_step(&self, state: &mut PhysicsState) -> Result<()> {
        self.invoke(Hook::AfterStep, state)
    }

    /// Stops at the first failing extension; later extensions are not called.
    fn invoke(&self, hook: Hook, state: &mut PhysicsState) -> Result<()> {
        let mut extensions = self.lock();
        for loaded in extensions.iter_mut() {
            let outcome = match hook {
                Hook::BeforeStep => loaded.extension.before_step(state),
                Hook::AfterStep => loaded.extension.after_step(state),
            };

            outcome.map_err(|source| PluginError::HookFailed {
                extension: loaded.name.clone(),
                hook,
                source,
            })?;
        }
        Ok(())
    }

    /// Calls `cleanup` on every extension in registration order and empties
    /// the registry.
    ///
    /// Every extension is cleaned up even if an earlier one fails; the
    /// failures are returned in order. Libraries stay loaded.
    pub fn cleanup_all(&self) -> Vec<PluginError> {
        let extensions = std::mem::take(&mut *self.lock());
        let mut failures = Vec::new();

        for mut loaded in extensions {
            match loaded.extension.cleanup() {
                Ok(()) => debug!(name = %loaded.name, "Extension cleaned up"),
                Err(source) => {
                    warn!(name = %loaded.name, error = %source, "Extension cleanup failed");
                    failures.push(PluginError::CleanupFailed {
                        extension: loaded.name,
                        source,
                    });
                }
            }
        }

        failures
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &*self.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::StaticLoader;
    use flightdeck_core::{ExtensionError, NullSink, Vector3};

    /// Records every call into a shared journal.
    struct Probe {
        name: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
        fail_after: bool,
        fail_cleanup: bool,
    }

    impl Probe {
        fn new(name: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                journal: Arc::clone(journal),
                fail_init: false,
                fail_after: false,
                fail_cleanup: false,
            }
        }

        fn note(&self, event: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event));
        }
    }

    impl Extension for Probe {
        fn initialize(&mut self, logger: Logger, _settings: &RunSettings) -> flightdeck_core::Result<()> {
            self.note("initialize");
            logger.debug("initializing");
            if self.fail_init {
                return Err(ExtensionError::msg("no seed"));
            }
            Ok(())
        }

        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> &str {
            "0.1.0"
        }

        fn before_step(&mut self, _state: &mut PhysicsState) -> flightdeck_core::Result<()> {
            self.note("before_step");
            Ok(())
        }

        fn after_step(&mut self, _state: &mut PhysicsState) -> flightdeck_core::Result<()> {
            self.note("after_step");
            if self.fail_after {
                return Err(ExtensionError::msg("diverged"));
            }
            Ok(())
        }

        fn cleanup(&mut self) -> flightdeck_core::Result<()> {
            self.note("cleanup");
            if self.fail_cleanup {
                return Err(ExtensionError::msg("leak"));
            }
            Ok(())
        }
    }

    fn logger() -> Logger {
        Logger::new(Arc::new(NullSink))
    }

    fn journal() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn load(registry: &ExtensionRegistry, loader: &StaticLoader, name: &str) -> Result<ExtensionInfo> {
        let artifact = PathBuf::from(format!("/plugins/{name}.so"));
        registry.load_extension(loader, &artifact, &logger(), &RunSettings::default())
    }

    #[test]
    fn test_load_registers_in_order() {
        let journal = journal();
        let (a, b) = (Arc::clone(&journal), Arc::clone(&journal));
        let loader = StaticLoader::new()
            .with("a", move || Box::new(Probe::new("a", &a)))
            .with("b", move || Box::new(Probe::new("b", &b)));

        let registry = ExtensionRegistry::new();
        let info = load(&registry, &loader, "b").unwrap();
        load(&registry, &loader, "a").unwrap();

        assert_eq!(info.name, "b");
        assert_eq!(info.version, "0.1.0");
        assert_eq!(info.artifact, PathBuf::from("/plugins/b.so"));
        assert_eq!(info.state, ExtensionState::Initialized);
        let names: Vec<String> = registry.extensions().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "a"]);

        let mut state = PhysicsState::default();
        registry.invoke_before_step(&mut state).unwrap();
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["b:initialize", "a:initialize", "b:before_step", "a:before_step"]
        );
    }

    #[test]
    fn test_failed_initialize_is_not_registered() {
        let journal = journal();
        let j = Arc::clone(&journal);
        let loader = StaticLoader::new().with("broken", move || {
            let mut probe = Probe::new("broken", &j);
            probe.fail_init = true;
            Box::new(probe)
        });

        let registry = ExtensionRegistry::new();
        let err = load(&registry, &loader, "broken").unwrap_err();

        assert!(matches!(err, PluginError::InitError { .. }));
        assert!(err.to_string().contains("/plugins/broken.so"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failing_hook_stops_later_extensions() {
        let journal = journal();
        let (a, b, c) = (
            Arc::clone(&journal),
            Arc::clone(&journal),
            Arc::clone(&journal),
        );
        let loader = StaticLoader::new()
            .with("a", move || Box::new(Probe::new("a", &a)))
            .with("b", move || {
                let mut probe = Probe::new("b", &b);
                probe.fail_after = true;
                Box::new(probe)
            })
            .with("c", move || Box::new(Probe::new("c", &c)));

        let registry = ExtensionRegistry::new();
        for name in ["a", "b", "c"] {
            load(&registry, &loader, name).unwrap();
        }
        journal.lock().unwrap().clear();

        let err = registry
            .invoke_after_step(&mut PhysicsState::default())
            .unwrap_err();

        match &err {
            PluginError::HookFailed { extension, hook, .. } => {
                assert_eq!(extension, "b");
                assert_eq!(*hook, Hook::AfterStep);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*journal.lock().unwrap(), vec!["a:after_step", "b:after_step"]);
    }

    #[test]
    fn test_mutations_apply_in_registration_order() {
        struct Scale(f64);
        struct Shift(f64);

        impl Extension for Scale {
            fn initialize(&mut self, _: Logger, _: &RunSettings) -> flightdeck_core::Result<()> {
                Ok(())
            }
            fn name(&self) -> &str {
                "scale"
            }
            fn version(&self) -> &str {
                "1.0.0"
            }
            fn after_step(&mut self, state: &mut PhysicsState) -> flightdeck_core::Result<()> {
                state.velocity = state.velocity * self.0;
                Ok(())
            }
        }

        impl Extension for Shift {
            fn initialize(&mut self, _: Logger, _: &RunSettings) -> flightdeck_core::Result<()> {
                Ok(())
            }
            fn name(&self) -> &str {
                "shift"
            }
            fn version(&self) -> &str {
                "1.0.0"
            }
            fn after_step(&mut self, state: &mut PhysicsState) -> flightdeck_core::Result<()> {
                state.velocity.x += self.0;
                Ok(())
            }
        }

        let loader = StaticLoader::new()
            .with("scale", || Box::new(Scale(2.0)))
            .with("shift", || Box::new(Shift(3.0)));

        let scale_first = ExtensionRegistry::new();
        load(&scale_first, &loader, "scale").unwrap();
        load(&scale_first, &loader, "shift").unwrap();

        let shift_first = ExtensionRegistry::new();
        load(&shift_first, &loader, "shift").unwrap();
        load(&shift_first, &loader, "scale").unwrap();

        let mut state = PhysicsState::default();
        state.velocity = Vector3::new(1.0, 0.0, 0.0);
        let mut other = state.clone();

        scale_first.invoke_after_step(&mut state).unwrap();
        shift_first.invoke_after_step(&mut other).unwrap();

        assert_eq!(state.velocity.x, 1.0 * 2.0 + 3.0);
        assert_eq!(other.velocity.x, (1.0 + 3.0) * 2.0);
    }

    #[test]
    fn test_cleanup_runs_once_for_every_extension() {
        let journal = journal();
        let (a, b) = (Arc::clone(&journal), Arc::clone(&journal));
        let loader = StaticLoader::new()
            .with("a", move || {
                let mut probe = Probe::new("a", &a);
                probe.fail_cleanup = true;
                Box::new(probe)
            })
            .with("b", move || Box::new(Probe::new("b", &b)));

        let registry = ExtensionRegistry::new();
        load(&registry, &loader, "a").unwrap();
        load(&registry, &loader, "b").unwrap();
        journal.lock().unwrap().clear();

        let failures = registry.cleanup_all();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("'a'"));
        assert_eq!(*journal.lock().unwrap(), vec!["a:cleanup", "b:cleanup"]);
        assert!(registry.is_empty());

        assert!(registry.cleanup_all().is_empty());
        assert_eq!(journal.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_clones_share_extensions() {
        let journal = journal();
        let loader = StaticLoader::new().with("a", move || Box::new(Probe::new("a", &journal)));

        let registry = ExtensionRegistry::new();
        let handle = registry.clone();
        load(&registry, &loader, "a").unwrap();

        assert_eq!(handle.len(), 1);
    }
}
