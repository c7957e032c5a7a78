//! Flightdeck Core - Extension contract and shared types for Flightdeck.
//!
//! Plugins depend on this crate only. It defines the [`Extension`] trait every
//! plugin implements, the [`PhysicsState`] handed to step hooks, the run
//! [`RunSettings`], and the [`Logger`] threaded into each extension.

mod error;
mod extension;
mod hook;
mod log;
mod settings;
mod state;

pub use error::{ExtensionError, Result};
pub use extension::{
    API_VERSION, CONTRACT_FINGERPRINT, ENTRY_SYMBOL, Extension, ExtensionDeclaration,
    RUSTC_VERSION,
};
pub use hook::Hook;
pub use log::{Level, LogSink, Logger, NullSink};
pub use settings::{
    PluginSettings, PropulsionSettings, RunSettings, SettingsError, SimulationSettings,
    StorageSettings, VehicleSettings,
};
pub use state::{Event, PhysicsState, Quaternion, Vector3};
