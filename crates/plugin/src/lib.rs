//! Flightdeck Plugin - Native plugin support for Flightdeck.
//!
//! This crate turns plugin source directories into dynamic libraries
//! ([`PluginCompiler`]), loads them behind the [`ExtensionLoader`] capability
//! ([`NativeLoader`], [`StaticLoader`]), and keeps the ordered
//! [`ExtensionRegistry`] whose hooks the physics core invokes every step.

mod compiler;
mod descriptor;
mod error;
mod host;
mod loader;
mod registry;
mod toolchain;

pub use compiler::{CompileReport, PluginCompiler};
pub use descriptor::ExtensionDescriptor;
pub use error::{BuildError, CompileFailure, CompileFailures, PluginError, Result};
pub use host::{TracingSink, host_logger};
pub use loader::{ExtensionLoader, LoadedModule, ModuleHandle, NativeLoader, StaticLoader};
pub use registry::{ExtensionInfo, ExtensionRegistry, ExtensionState};
pub use toolchain::{BuildOutput, BuildRequest, Toolchain};
