//! Flightdeck Engine - Run lifecycle for Flightdeck simulations.
//!
//! The [`Controller`] compiles and loads plugins, acquires the run's
//! collaborators in order with rollback, drives the physics core, and tears
//! everything down again. [`StepLoop`] gives physics cores a fixed-step loop
//! that calls extension hooks around every integration step.

mod collaborators;
mod controller;
mod error;
mod records;
mod run_id;
mod stepper;
mod validate;

pub use collaborators::{
    BoxError, Collaborators, CoreFactory, PhysicsCore, PropulsionLoader, RecordKind, ResultStore,
    Specification, StoreHandle, StoreOpener, Stores, VehicleLoader,
};
pub use controller::{Controller, Status, StatusHandle};
pub use error::{EngineError, Result};
pub use records::{CsvStore, CsvStoreOpener, read_records};
pub use run_id::RunId;
pub use stepper::{Integrator, StepError, StepLoop, StepSummary};
pub use validate::{MAX_STEP, validate_simulation};
