//! Run lifecycle controller.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flightdeck_core::{Logger, RunSettings};
use flightdeck_plugin::{
    ExtensionInfo, ExtensionLoader, ExtensionRegistry, NativeLoader, PluginCompiler, host_logger,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::collaborators::{
    Collaborators, PhysicsCore, RecordKind, Specification, StoreHandle, StoreOpener, Stores,
};
use crate::error::{EngineError, Result};
use crate::run_id::RunId;
use crate::validate::validate_simulation;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Initializing,
    Running,
    Completed,
    Failed,
    Closed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Initializing => "initializing",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Closed => "closed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read access to a controller's status from any thread.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    status: Arc<Mutex<Status>>,
}

impl StatusHandle {
    fn new() -> Self {
        Self {
            status: Arc::new(Mutex::new(Status::Idle)),
        }
    }

    /// Current status.
    pub fn get(&self) -> Status {
        *self.lock()
    }

    fn set(&self, status: Status) {
        *self.lock() = status;
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drives one simulation run through initialize, run and close.
pub struct Controller {
    /// Settings of the run.
    settings: RunSettings,

    /// Shared status, readable through [`StatusHandle`].
    status: StatusHandle,

    /// How compiled artifacts become extensions.
    loader: Arc<dyn ExtensionLoader>,

    /// Logger handed to every extension.
    logger: Logger,

    /// Plugin build toolchain executable.
    toolchain: PathBuf,

    /// Maximum number of concurrent plugin builds.
    max_parallelism: Option<usize>,

    /// Active extensions, once loaded.
    registry: Option<ExtensionRegistry>,

    /// Acquired stores, in acquisition order.
    stores: Vec<StoreHandle>,

    /// The constructed physics core; `Some` means ready to run.
    core: Option<Box<dyn PhysicsCore>>,

    /// Identifier of the initialized run.
    run_id: Option<RunId>,
}

impl Controller {
    /// Creates an idle controller for a run.
    pub fn new(settings: RunSettings) -> Self {
        Self {
            settings,
            status: StatusHandle::new(),
            loader: Arc::new(NativeLoader::new()),
            logger: host_logger(),
            toolchain: PathBuf::from("cargo"),
            max_parallelism: None,
            registry: None,
            stores: Vec::new(),
            core: None,
            run_id: None,
        }
    }

    /// Loads extensions through `loader` instead of native libraries.
    pub fn with_loader(mut self, loader: Arc<dyn ExtensionLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Sets the logger handed to extensions.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Uses a specific plugin build toolchain instead of `cargo` on `PATH`.
    pub fn with_toolchain(mut self, program: impl Into<PathBuf>) -> Self {
        self.toolchain = program.into();
        self
    }

    /// Sets the maximum number of concurrent plugin builds.
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = Some(max);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// A handle for reading the status from other threads.
    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Identifier of the run, once initialization computed it.
    pub fn run_id(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    /// Active extensions in invocation order.
    pub fn extensions(&self) -> Vec<ExtensionInfo> {
        self.registry
            .as_ref()
            .map(ExtensionRegistry::extensions)
            .unwrap_or_default()
    }

    /// Whether `initialize` succeeded and the run has not started.
    pub fn is_ready(&self) -> bool {
        self.status() == Status::Idle && self.core.is_some()
    }

    /// Prepares the run.
    ///
    /// Compiles and loads plugins, validates settings, loads the vehicle and
    /// propulsion specifications, opens the result stores and builds the
    /// physics core, in that order. The first failure sets [`Status::Failed`];
    /// [`close`](Self::close) still releases whatever was acquired.
    pub async fn initialize(&mut self, collaborators: &Collaborators) -> Result<()> {
        {
            let mut status = self.status.lock();
            match *status {
                Status::Idle if self.core.is_some() => return Err(EngineError::AlreadyInitialized),
                Status::Idle => *status = Status::Initializing,
                other => {
                    return Err(EngineError::InvalidTransition {
                        operation: "initialize",
                        status: other,
                    });
                }
            }
        }

        info!("Initializing simulation");
        match self.prepare(collaborators).await {
            Ok(()) => {
                self.status.set(Status::Idle);
                info!(
                    run_id = self.run_id.as_ref().map(RunId::short).unwrap_or_default(),
                    extensions = self.extensions().len(),
                    "Simulation ready"
                );
                Ok(())
            }
            Err(e) => {
                self.status.set(Status::Failed);
                error!(error = %e, "Simulation initialization failed");
                Err(e)
            }
        }
    }

    async fn prepare(&mut self, collaborators: &Collaborators) -> Result<()> {
        let registry = self.load_extensions().await?;

        validate_simulation(&self.settings.simulation)?;

        let vehicle = collaborators
            .vehicle
            .load_vehicle(&self.settings.vehicle.path, &self.settings.vehicle.format_version)
            .map_err(|source| EngineError::VehicleLoad {
                path: self.settings.vehicle.path.clone(),
                source,
            })?;
        let propulsion = collaborators
            .propulsion
            .load_propulsion(&self.settings.propulsion.designation)
            .map_err(|source| EngineError::PropulsionLoad {
                designation: self.settings.propulsion.designation.clone(),
                source,
            })?;
        debug!(
            vehicle_bytes = vehicle.bytes().len(),
            designation = %self.settings.propulsion.designation,
            "Loaded specifications"
        );

        let run_id = RunId::compute(&self.settings, vehicle.bytes(), propulsion.bytes())?;
        debug!(run_id = %run_id, "Computed run identifier");

        let stores = self.acquire_stores(collaborators.storage.as_ref(), &run_id)?;
        self.run_id = Some(run_id);

        let mut core = collaborators
            .core
            .build(&self.settings, registry, stores)
            .map_err(EngineError::CoreConstruction)?;
        let installed = install(core.as_mut(), &vehicle, &propulsion);
        self.core = Some(core);
        installed?;

        Ok(())
    }

    /// Compiles the plugin sources and loads every artifact, all or nothing.
    async fn load_extensions(&mut self) -> Result<ExtensionRegistry> {
        let plugins = &self.settings.plugins;
        let mut compiler = PluginCompiler::new(&plugins.source_dir, &plugins.output_dir)
            .with_toolchain(&self.toolchain)
            .with_release(plugins.release);
        if let Some(max) = self.max_parallelism {
            compiler = compiler.with_max_parallelism(max);
        }

        let report = compiler.compile_all().await?;
        if let Some(failures) = report.failures() {
            return Err(failures.into());
        }

        let artifacts = report.artifacts().into_iter().chain(plugins.paths.iter().cloned());
        let registry = ExtensionRegistry::new();
        for artifact in artifacts {
            let loaded =
                registry.load_extension(self.loader.as_ref(), &artifact, &self.logger, &self.settings);
            if let Err(e) = loaded {
                let unloaded = registry.len();
                for failure in registry.cleanup_all() {
                    warn!(error = %failure, "Cleanup after failed plugin load");
                }
                debug!(unloaded, "Discarded partially loaded extension set");
                return Err(e.into());
            }
        }

        self.registry = Some(registry.clone());
        Ok(registry)
    }

    /// Opens and initializes one store per record kind.
    ///
    /// On failure every store opened by this call is closed before returning.
    fn acquire_stores(&mut self, opener: &dyn StoreOpener, run_id: &RunId) -> Result<Stores> {
        let mut acquired = Vec::with_capacity(RecordKind::ALL.len());
        match open_stores(opener, run_id, &mut acquired) {
            Ok(stores) => {
                self.stores = acquired;
                Ok(stores)
            }
            Err(e) => {
                for handle in acquired.iter().rev() {
                    if let Err(source) = handle.close() {
                        warn!(kind = %handle.kind(), error = %source, "Failed to release store");
                    }
                }
                Err(e)
            }
        }
    }

    /// Runs the initialized simulation on a blocking worker thread.
    ///
    /// The core's error is returned unchanged.
    pub async fn run(&mut self) -> Result<()> {
        let mut core = {
            let mut status = self.status.lock();
            match *status {
                Status::Idle => match self.core.take() {
                    Some(core) => {
                        *status = Status::Running;
                        core
                    }
                    None => return Err(EngineError::NotInitialized),
                },
                other => {
                    return Err(EngineError::InvalidTransition {
                        operation: "run",
                        status: other,
                    });
                }
            }
        };

        info!("Running simulation");
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = core.run();
            (core, outcome)
        })
        .await;

        let outcome = match joined {
            Ok((core, outcome)) => {
                self.core = Some(core);
                outcome.map_err(EngineError::Run)
            }
            Err(e) => Err(EngineError::Join(e)),
        };

        match outcome {
            Ok(()) => {
                self.status.set(Status::Completed);
                info!("Simulation completed successfully");
                Ok(())
            }
            Err(e) => {
                self.status.set(Status::Failed);
                error!(error = %e, "Simulation failed");
                Err(e)
            }
        }
    }

    /// Releases everything the run acquired.
    ///
    /// Closes the physics core, then the stores in reverse acquisition order,
    /// then cleans up every extension in registration order. All steps are
    /// attempted; the first error is returned. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let current = self.status.get();
        if current == Status::Closed {
            debug!("Simulation already closed");
            return Ok(());
        }
        debug!(from = %current, "Closing simulation");

        let mut first_error: Option<EngineError> = None;

        if let Some(mut core) = self.core.take() {
            if let Err(source) = core.close() {
                warn!(error = %source, "Failed to close simulation core");
                first_error.get_or_insert(EngineError::CoreClose(source));
            }
        }

        for handle in self.stores.drain(..).rev() {
            if let Err(source) = handle.close() {
                warn!(kind = %handle.kind(), error = %source, "Failed to close store");
                first_error.get_or_insert(EngineError::StoreClose {
                    kind: handle.kind(),
                    source,
                });
            }
        }

        if let Some(registry) = self.registry.take() {
            for failure in registry.cleanup_all() {
                first_error.get_or_insert(failure.into());
            }
        }

        self.status.set(Status::Closed);
        info!(
            run_id = self.run_id.as_ref().map(RunId::short).unwrap_or_default(),
            "Simulation closed"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("status", &self.status.get())
            .field("run_id", &self.run_id)
            .field("extensions", &self.extensions())
            .field("stores", &self.stores.len())
            .field("ready", &self.core.is_some())
            .finish_non_exhaustive()
    }
}

fn open_stores(
    opener: &dyn StoreOpener,
    run_id: &RunId,
    acquired: &mut Vec<StoreHandle>,
) -> Result<Stores> {
    Ok(Stores {
        motion: open_store(opener, RecordKind::Motion, run_id, acquired)?,
        events: open_store(opener, RecordKind::Events, run_id, acquired)?,
        dynamics: open_store(opener, RecordKind::Dynamics, run_id, acquired)?,
    })
}

fn open_store(
    opener: &dyn StoreOpener,
    kind: RecordKind,
    run_id: &RunId,
    acquired: &mut Vec<StoreHandle>,
) -> Result<StoreHandle> {
    let store = opener
        .open(kind, run_id)
        .map_err(|source| EngineError::StoreOpen { kind, source })?;
    let handle = StoreHandle::new(kind, store);
    acquired.push(handle.clone());

    handle
        .init()
        .map_err(|source| EngineError::StoreInit { kind, source })?;
    debug!(%kind, "Opened store");
    Ok(handle)
}

fn install(
    core: &mut dyn PhysicsCore,
    vehicle: &Specification,
    propulsion: &Specification,
) -> Result<()> {
    core.load_vehicle(vehicle, propulsion)
        .map_err(EngineError::VehicleInstall)
}
