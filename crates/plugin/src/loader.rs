//! Loading extensions from compiled artifacts.
//!
//! [`NativeLoader`] opens dynamic libraries with `libloading`. Libraries are
//! process-global and are never unloaded: there is no safe way to unload a
//! library whose code may still be referenced, so each opened library is
//! kept for the rest of the process and reused if the same artifact is
//! loaded again. [`StaticLoader`] serves extensions linked into the host.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use flightdeck_core::{
    API_VERSION, CONTRACT_FINGERPRINT, ENTRY_SYMBOL, Extension, ExtensionDeclaration, RUSTC_VERSION,
};
use libloading::Library;
use semver::Version;
use tracing::debug;

use crate::error::{PluginError, Result};

/// Opaque ownership of the module an extension came from.
pub struct ModuleHandle {
    kind: ModuleKind,
}

enum ModuleKind {
    Native {
        path: PathBuf,
        _library: &'static Library,
    },
    Static,
}

impl ModuleHandle {
    /// Library path for native modules.
    pub fn library_path(&self) -> Option<&Path> {
        match &self.kind {
            ModuleKind::Native { path, .. } => Some(path),
            ModuleKind::Static => None,
        }
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ModuleKind::Native { path, .. } => {
                f.debug_tuple("Native").field(&path.display()).finish()
            }
            ModuleKind::Static => f.write_str("Static"),
        }
    }
}

/// A freshly created extension that has not been initialized yet.
pub struct LoadedModule {
    pub extension: Box<dyn Extension>,
    pub handle: ModuleHandle,
}

/// Capability for turning an artifact path into an extension instance.
pub trait ExtensionLoader: Send + Sync {
    /// Opens `artifact`, validates the extension contract, and constructs
    /// an uninitialized extension.
    fn load(&self, artifact: &Path) -> Result<LoadedModule>;
}

/// Libraries opened by this process, keyed by canonical path.
static LIBRARIES: LazyLock<Mutex<HashMap<PathBuf, &'static Library>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Loads extensions from native dynamic libraries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }

    /// Opens the library at `path`, or returns the already opened one.
    fn open(path: &Path) -> Result<&'static Library> {
        if !path.is_file() {
            return Err(PluginError::NotFound(path.to_path_buf()));
        }
        let key = path.canonicalize()?;

        let mut libraries = LIBRARIES.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(library) = libraries.get(&key) {
            debug!(path = %key.display(), "Reusing loaded plugin library");
            return Ok(*library);
        }

        // SAFETY: Loading a library runs its initializers. Plugin artifacts are
        // produced by the plugin compiler and trusted by contract.
        let library = unsafe { Library::new(&key) }.map_err(|source| PluginError::LoadError {
            path: path.to_path_buf(),
            source,
        })?;
        let library: &'static Library = Box::leak(Box::new(library));
        libraries.insert(key, library);

        Ok(library)
    }
}

impl ExtensionLoader for NativeLoader {
    fn load(&self, artifact: &Path) -> Result<LoadedModule> {
        let library = Self::open(artifact)?;

        // SAFETY: The symbol is the `ExtensionDeclaration` static emitted by
        // `export_extension!`; its layout is checked by `validate_declaration`
        // before `create` is called.
        let declaration = unsafe {
            let symbol = library
                .get::<*const ExtensionDeclaration>(ENTRY_SYMBOL.as_bytes())
                .map_err(|_| PluginError::SymbolNotFound {
                    path: artifact.to_path_buf(),
                    symbol: ENTRY_SYMBOL.to_string(),
                })?;
            let pointer: *const ExtensionDeclaration = *symbol;
            if pointer.is_null() {
                return Err(PluginError::SymbolNotFound {
                    path: artifact.to_path_buf(),
                    symbol: ENTRY_SYMBOL.to_string(),
                });
            }
            *pointer
        };

        validate_declaration(artifact, &declaration)?;

        Ok(LoadedModule {
            extension: (declaration.create)(),
            handle: ModuleHandle {
                kind: ModuleKind::Native {
                    path: artifact.to_path_buf(),
                    _library: library,
                },
            },
        })
    }
}

/// Checks that a declaration was built against a compatible contract.
pub(crate) fn validate_declaration(
    artifact: &Path,
    declaration: &ExtensionDeclaration,
) -> Result<()> {
    let mismatch = |reason: String| PluginError::ContractMismatch {
        path: artifact.to_path_buf(),
        reason,
    };

    if !is_same_version(declaration.api_version, API_VERSION) {
        return Err(mismatch(format!(
            "API version {} does not match host API version {}",
            declaration.api_version, API_VERSION
        )));
    }

    if declaration.rustc_version != RUSTC_VERSION {
        return Err(mismatch(format!(
            "built with '{}', host built with '{}'",
            declaration.rustc_version, RUSTC_VERSION
        )));
    }

    if declaration.contract_fingerprint != CONTRACT_FINGERPRINT {
        return Err(mismatch(format!(
            "contract fingerprint {:016x} differs from host {:016x}",
            declaration.contract_fingerprint, CONTRACT_FINGERPRINT
        )));
    }

    Ok(())
}

/// Whether two contract versions are the same semver version.
///
/// Minor and patch differences count as mismatches.
fn is_same_version(plugin_version: &str, host_version: &str) -> bool {
    match (Version::parse(plugin_version), Version::parse(host_version)) {
        (Ok(plugin), Ok(host)) => plugin == host,
        _ => false,
    }
}

type Constructor = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// Serves extensions linked into the host, keyed by artifact file stem.
///
/// `drag.so`, `drag.dll` and `drag` all resolve to the constructor registered
/// as `drag`. Useful when plugins are statically linked and in tests.
#[derive(Clone, Default)]
pub struct StaticLoader {
    constructors: HashMap<String, Constructor>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        self.register(name, constructor);
        self
    }

    /// Registers the constructor of an exported declaration.
    pub fn register_declaration(
        &mut self,
        name: impl Into<String>,
        declaration: ExtensionDeclaration,
    ) -> Result<&mut Self> {
        let name = name.into();
        validate_declaration(Path::new(&name), &declaration)?;
        Ok(self.register(name, declaration.create))
    }
}

impl ExtensionLoader for StaticLoader {
    fn load(&self, artifact: &Path) -> Result<LoadedModule> {
        let constructor = artifact
            .file_stem()
            .and_then(|stem| self.constructors.get(&*stem.to_string_lossy()))
            .ok_or_else(|| PluginError::NotFound(artifact.to_path_buf()))?;

        Ok(LoadedModule {
            extension: constructor(),
            handle: ModuleHandle {
                kind: ModuleKind::Static,
            },
        })
    }
}

impl fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("StaticLoader")
            .field("constructors", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightdeck_core::{Logger, RunSettings};
    use std::fs;
    use tempfile::tempdir;

    struct Named(&'static str);

    impl Extension for Named {
        fn initialize(
            &mut self,
            _logger: Logger,
            _settings: &RunSettings,
        ) -> flightdeck_core::Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }

        fn version(&self) -> &str {
            "1.0.0"
        }
    }

    fn create_named() -> Box<dyn Extension> {
        Box::new(Named("declared"))
    }

    fn declaration() -> ExtensionDeclaration {
        ExtensionDeclaration {
            api_version: API_VERSION,
            rustc_version: RUSTC_VERSION,
            contract_fingerprint: CONTRACT_FINGERPRINT,
            create: create_named,
        }
    }

    #[test]
    fn test_version_must_match_exactly() {
        assert!(is_same_version("1.0.0", "1.0.0"));
        assert!(!is_same_version("1.0.0", "1.1.0"));
        assert!(!is_same_version("1.0.3", "1.2.0"));
        assert!(!is_same_version("1.0.1", "1.0.0"));
        assert!(!is_same_version("2.0.0", "1.0.0"));
        assert!(!is_same_version("not-a-version", "1.0.0"));
    }

    #[test]
    fn test_validate_declaration() {
        let good = declaration();
        assert!(validate_declaration(Path::new("a.so"), &good).is_ok());

        let old_api = ExtensionDeclaration {
            api_version: "0.9.0",
            ..good
        };
        let err = validate_declaration(Path::new("a.so"), &old_api).unwrap_err();
        assert!(matches!(err, PluginError::ContractMismatch { .. }));
        assert!(err.to_string().contains("a.so"));

        let other_compiler = ExtensionDeclaration {
            rustc_version: "rustc 0.0.0",
            ..good
        };
        let err = validate_declaration(Path::new("a.so"), &other_compiler).unwrap_err();
        assert!(err.to_string().contains("rustc 0.0.0"));
    }

    #[test]
    fn test_rejects_minor_version_skew() {
        let host = Version::parse(API_VERSION).unwrap();
        let skewed_version = if host.minor > 0 {
            format!("{}.{}.0", host.major, host.minor - 1)
        } else {
            format!("{}.{}.0", host.major, host.minor + 1)
        };
        let skewed = ExtensionDeclaration {
            api_version: Box::leak(skewed_version.into_boxed_str()),
            ..declaration()
        };

        let err = validate_declaration(Path::new("/plugins/wind.so"), &skewed).unwrap_err();
        match err {
            PluginError::ContractMismatch { path, reason } => {
                assert_eq!(path, PathBuf::from("/plugins/wind.so"));
                assert!(reason.contains(API_VERSION));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_other_layout() {
        let skewed = ExtensionDeclaration {
            contract_fingerprint: CONTRACT_FINGERPRINT ^ 1,
            ..declaration()
        };

        let err = validate_declaration(Path::new("/plugins/wind.so"), &skewed).unwrap_err();
        assert!(matches!(err, PluginError::ContractMismatch { .. }));
        assert!(err.to_string().contains("/plugins/wind.so"));
        assert!(err.to_string().contains("fingerprint"));

        let mut loader = StaticLoader::new();
        assert!(loader.register_declaration("wind", skewed).is_err());
        assert!(loader.load(Path::new("wind")).is_err());
    }

    #[test]
    fn test_native_missing_artifact() {
        let err = NativeLoader::new()
            .load(Path::new("/nonexistent/drag.so"))
            .err()
            .unwrap();
        assert!(matches!(err, PluginError::NotFound(_)));
        assert!(err.to_string().contains("/nonexistent/drag.so"));
    }

    #[test]
    fn test_native_rejects_non_library() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.so");
        fs::write(&path, b"definitely not an ELF file").unwrap();

        let err = NativeLoader::new().load(&path).err().unwrap();
        assert!(matches!(err, PluginError::LoadError { .. }));
        assert!(err.to_string().contains("garbage.so"));
    }

    #[test]
    fn test_static_loader_resolves_by_stem() {
        let loader = StaticLoader::new().with("wind", || Box::new(Named("wind")));

        let module = loader.load(Path::new("/out/wind.so")).unwrap();
        assert_eq!(module.extension.name(), "wind");
        assert!(module.handle.library_path().is_none());

        let err = loader.load(Path::new("/out/drag.so")).err().unwrap();
        assert!(matches!(err, PluginError::NotFound(_)));
    }

    #[test]
    fn test_static_loader_accepts_declarations() {
        let mut loader = StaticLoader::new();
        loader
            .register_declaration("declared", declaration())
            .unwrap();

        let module = loader.load(Path::new("declared")).unwrap();
        assert_eq!(module.extension.name(), "declared");
    }
}
