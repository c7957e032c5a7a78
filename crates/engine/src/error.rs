//! Engine error types.

use std::path::PathBuf;

use flightdeck_core::SettingsError;
use flightdeck_plugin::{CompileFailures, PluginError};
use thiserror::Error;

use crate::collaborators::{BoxError, RecordKind};
use crate::controller::Status;

/// Error type for run lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// One or more plugins failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileFailures),

    /// Plugin toolchain, loading or teardown error.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// A run-level numeric setting is out of range.
    #[error("Invalid simulation {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    /// Settings could not be serialized for the run identifier.
    #[error("Failed to serialize run settings")]
    Settings(#[from] SettingsError),

    /// The vehicle specification could not be loaded.
    #[error("Failed to load vehicle specification '{path}'")]
    VehicleLoad {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// The propulsion specification could not be loaded.
    #[error("Failed to load propulsion data for '{designation}'")]
    PropulsionLoad {
        designation: String,
        #[source]
        source: BoxError,
    },

    /// A result store could not be opened.
    #[error("Failed to open {kind} store")]
    StoreOpen {
        kind: RecordKind,
        #[source]
        source: BoxError,
    },

    /// A result store could not be initialized.
    #[error("Failed to initialize {kind} store")]
    StoreInit {
        kind: RecordKind,
        #[source]
        source: BoxError,
    },

    /// A result store failed to close.
    #[error("Failed to close {kind} store")]
    StoreClose {
        kind: RecordKind,
        #[source]
        source: BoxError,
    },

    /// The physics core could not be constructed.
    #[error("Failed to create simulation core")]
    CoreConstruction(#[source] BoxError),

    /// Vehicle data could not be installed into the physics core.
    #[error("Failed to load vehicle into simulation core")]
    VehicleInstall(#[source] BoxError),

    /// The physics core failed to close.
    #[error("Failed to close simulation core")]
    CoreClose(#[source] BoxError),

    /// The run failed; the core's error is passed through unchanged.
    #[error(transparent)]
    Run(BoxError),

    /// The blocking run task panicked or was cancelled.
    #[error("Simulation task did not complete")]
    Join(#[from] tokio::task::JoinError),

    /// `run` was called before a successful `initialize`.
    #[error("Cannot run: simulation is not initialized")]
    NotInitialized,

    /// `initialize` was called on an already initialized controller.
    #[error("Cannot initialize: simulation is already initialized")]
    AlreadyInitialized,

    /// The operation is not allowed in the current status.
    #[error("Cannot {operation} while {status}")]
    InvalidTransition {
        operation: &'static str,
        status: Status,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
