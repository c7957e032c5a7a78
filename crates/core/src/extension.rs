//! The extension contract implemented by every plugin.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ExtensionError, Result};
use crate::log::Logger;
use crate::settings::RunSettings;
use crate::state::PhysicsState;

/// Version of the extension contract.
///
/// Hosts only accept plugins declaring exactly this version: a trait object
/// built against another version of [`Extension`] has a different vtable.
pub const API_VERSION: &str = "1.0.0";

/// Version of the compiler this crate was built with.
pub const RUSTC_VERSION: &str = env!("FLIGHTDECK_RUSTC_VERSION");

/// Fingerprint of the types passed between host and plugin.
///
/// Covers this crate's version, the target, and the size and alignment of
/// every value crossing the library boundary, including the `serde_json`
/// values inside [`RunSettings`]. Two builds that resolved different layouts
/// disagree on it.
pub const CONTRACT_FINGERPRINT: u64 = contract_fingerprint();

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

const fn contract_fingerprint() -> u64 {
    let mut hash = fnv1a(FNV_OFFSET, env!("CARGO_PKG_VERSION").as_bytes());
    hash = fnv1a(hash, API_VERSION.as_bytes());
    hash = fnv1a(hash, env!("FLIGHTDECK_TARGET").as_bytes());

    let layouts = [
        size_of::<RunSettings>(),
        align_of::<RunSettings>(),
        size_of::<BTreeMap<String, serde_json::Value>>(),
        size_of::<serde_json::Value>(),
        align_of::<serde_json::Value>(),
        size_of::<serde_json::Map<String, serde_json::Value>>(),
        size_of::<PhysicsState>(),
        align_of::<PhysicsState>(),
        size_of::<Logger>(),
        size_of::<ExtensionError>(),
        size_of::<Result<()>>(),
        size_of::<Box<dyn Extension>>(),
    ];

    let mut i = 0;
    while i < layouts.len() {
        hash = fnv1a(hash, &(layouts[i] as u64).to_le_bytes());
        i += 1;
    }
    hash
}

/// Name of the symbol every plugin library exports.
pub const ENTRY_SYMBOL: &str = "FLIGHTDECK_EXTENSION";

/// Behaviour hooked into the simulation step loop.
///
/// The host calls [`initialize`](Extension::initialize) exactly once before
/// any other entry point and [`cleanup`](Extension::cleanup) exactly once at
/// teardown, whether or not the run succeeded.
pub trait Extension: Send {
    /// Prepares internal state. Settings are read-only.
    fn initialize(&mut self, logger: Logger, settings: &RunSettings) -> Result<()>;

    /// Logical name of the extension.
    fn name(&self) -> &str;

    /// Extension version.
    fn version(&self) -> &str;

    /// Called before the integrator advances the state.
    ///
    /// Should not overwrite fields the integrator is about to compute.
    fn before_step(&mut self, _state: &mut PhysicsState) -> Result<()> {
        Ok(())
    }

    /// Called after the integrator advanced the state. Mutations are expected here.
    fn after_step(&mut self, _state: &mut PhysicsState) -> Result<()> {
        Ok(())
    }

    /// Releases internal state at the end of a run.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The value exported by a plugin library under [`ENTRY_SYMBOL`].
#[derive(Clone, Copy)]
pub struct ExtensionDeclaration {
    /// Contract version the plugin was built against.
    pub api_version: &'static str,

    /// Compiler that built the plugin.
    pub rustc_version: &'static str,

    /// [`CONTRACT_FINGERPRINT`] of the build the plugin linked against.
    pub contract_fingerprint: u64,

    /// Constructs a fresh, uninitialized extension.
    pub create: fn() -> Box<dyn Extension>,
}

impl fmt::Debug for ExtensionDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDeclaration")
            .field("api_version", &self.api_version)
            .field("rustc_version", &self.rustc_version)
            .field("contract_fingerprint", &self.contract_fingerprint)
            .finish_non_exhaustive()
    }
}

/// Exports an extension from a `cdylib` plugin crate.
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Drag;
///
/// impl flightdeck_core::Extension for Drag { /* ... */ }
///
/// flightdeck_core::export_extension!(Drag::default());
/// ```
#[macro_export]
macro_rules! export_extension {
    ($ctor:expr) => {
        #[doc(hidden)]
        #[unsafe(no_mangle)]
        pub static FLIGHTDECK_EXTENSION: $crate::ExtensionDeclaration =
            $crate::ExtensionDeclaration {
                api_version: $crate::API_VERSION,
                rustc_version: $crate::RUSTC_VERSION,
                contract_fingerprint: $crate::CONTRACT_FINGERPRINT,
                create: {
                    fn __flightdeck_create() -> ::std::boxed::Box<dyn $crate::Extension> {
                        ::std::boxed::Box::new($ctor)
                    }
                    __flightdeck_create
                },
            };
    };
}
