//! Interfaces of the components a run is assembled from.
//!
//! Vehicle and propulsion loading, result storage and the physics core live
//! outside this crate. The controller only sees them through these traits.

use std::any::Any;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flightdeck_core::RunSettings;
use flightdeck_plugin::ExtensionRegistry;

use crate::run_id::RunId;

/// Error type returned by collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A loaded vehicle or propulsion specification.
///
/// `bytes` is the raw source the specification was decoded from and feeds
/// the run identifier. The decoded form travels as an opaque payload to the
/// physics core.
pub struct Specification {
    bytes: Vec<u8>,
    payload: Box<dyn Any + Send>,
}

impl Specification {
    pub fn new<T: Any + Send>(bytes: impl Into<Vec<u8>>, payload: T) -> Self {
        Self {
            bytes: bytes.into(),
            payload: Box::new(payload),
        }
    }

    /// A specification with no decoded form beyond its bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(bytes, ())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The decoded payload, if it is a `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

impl fmt::Debug for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Specification")
            .field("bytes", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

/// Loads vehicle descriptions.
pub trait VehicleLoader: Send + Sync {
    fn load_vehicle(&self, path: &Path, format_version: &str) -> Result<Specification, BoxError>;
}

/// Loads motor data.
pub trait PropulsionLoader: Send + Sync {
    fn load_propulsion(&self, designation: &str) -> Result<Specification, BoxError>;
}

/// Category of simulation output, one store per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Motion,
    Events,
    Dynamics,
}

impl RecordKind {
    /// Every kind, in acquisition order.
    pub const ALL: [RecordKind; 3] = [RecordKind::Motion, RecordKind::Events, RecordKind::Dynamics];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Motion => "MOTION",
            RecordKind::Events => "EVENTS",
            RecordKind::Dynamics => "DYNAMICS",
        }
    }

    /// Column names of this kind's records.
    pub fn headers(&self) -> &'static [&'static str] {
        match self {
            RecordKind::Motion => &["time", "altitude", "velocity", "acceleration", "thrust"],
            RecordKind::Events => &["time", "event_name", "motor_status", "parachute_status"],
            RecordKind::Dynamics => &[
                "time",
                "position_x",
                "position_y",
                "position_z",
                "velocity_x",
                "velocity_y",
                "velocity_z",
                "acceleration_x",
                "acceleration_y",
                "acceleration_z",
                "orientation_x",
                "orientation_y",
                "orientation_z",
                "orientation_w",
            ],
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for one kind of record.
pub trait ResultStore: Send {
    /// Prepares the store, e.g. writes the header row.
    fn init(&mut self) -> Result<(), BoxError>;

    /// Appends one record.
    fn write(&mut self, record: &[String]) -> Result<(), BoxError>;

    /// Flushes and releases the store.
    fn close(&mut self) -> Result<(), BoxError>;
}

/// Opens result stores for a run.
pub trait StoreOpener: Send + Sync {
    fn open(&self, kind: RecordKind, run_id: &RunId) -> Result<Box<dyn ResultStore>, BoxError>;
}

/// Shared handle to an opened store.
///
/// The controller and the physics core hold clones of the same handle. Only
/// the controller initializes and closes it.
#[derive(Clone)]
pub struct StoreHandle {
    kind: RecordKind,
    store: Arc<Mutex<Box<dyn ResultStore>>>,
}

impl StoreHandle {
    pub fn new(kind: RecordKind, store: Box<dyn ResultStore>) -> Self {
        Self {
            kind,
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn write(&self, record: &[String]) -> Result<(), BoxError> {
        self.lock().write(record)
    }

    pub(crate) fn init(&self) -> Result<(), BoxError> {
        self.lock().init()
    }

    pub(crate) fn close(&self) -> Result<(), BoxError> {
        self.lock().close()
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn ResultStore>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// The stores of one run.
#[derive(Debug, Clone)]
pub struct Stores {
    pub motion: StoreHandle,
    pub events: StoreHandle,
    pub dynamics: StoreHandle,
}

/// The numerical simulation a run drives.
pub trait PhysicsCore: Send {
    /// Installs vehicle and motor data.
    fn load_vehicle(
        &mut self,
        vehicle: &Specification,
        propulsion: &Specification,
    ) -> Result<(), BoxError>;

    /// Runs the simulation to completion.
    ///
    /// Must call the registry's `before_step` and `after_step` hooks once per
    /// integration step and treat a hook error as a step failure.
    fn run(&mut self) -> Result<(), BoxError>;

    /// Releases resources held by the core.
    fn close(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Constructs physics cores.
pub trait CoreFactory: Send + Sync {
    fn build(
        &self,
        settings: &RunSettings,
        registry: ExtensionRegistry,
        stores: Stores,
    ) -> Result<Box<dyn PhysicsCore>, BoxError>;
}

/// Everything `initialize` needs from outside the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub vehicle: Arc<dyn VehicleLoader>,
    pub propulsion: Arc<dyn PropulsionLoader>,
    pub storage: Arc<dyn StoreOpener>,
    pub core: Arc<dyn CoreFactory>,
}
