//! Run settings shared by the host and every extension.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised while reading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read settings file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings for one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunSettings {
    /// Integration parameters.
    #[serde(default)]
    pub simulation: SimulationSettings,

    /// Vehicle description file.
    #[serde(default)]
    pub vehicle: VehicleSettings,

    /// Motor selection.
    #[serde(default)]
    pub propulsion: PropulsionSettings,

    /// Plugin source and artifact locations.
    #[serde(default)]
    pub plugins: PluginSettings,

    /// Result storage location.
    #[serde(default)]
    pub storage: StorageSettings,

    /// Free-form options keyed by extension name.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

/// Integration parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Integration step in seconds.
    pub step: f64,

    /// Upper bound on simulated time in seconds.
    pub max_time: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            step: 0.001,
            max_time: 300.0,
        }
    }
}

/// Vehicle description source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VehicleSettings {
    /// Path to the vehicle description file.
    pub path: PathBuf,

    /// Format version of the description file.
    #[serde(default)]
    pub format_version: String,
}

/// Motor selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PropulsionSettings {
    /// Motor designation, e.g. `H128W-14A`.
    pub designation: String,
}

/// Plugin source and artifact locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Directory holding one sub-directory per plugin crate.
    pub source_dir: PathBuf,

    /// Directory compiled plugin libraries are written to.
    pub output_dir: PathBuf,

    /// Prebuilt plugin libraries loaded after the compiled ones.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Build plugins with the release profile.
    #[serde(default = "default_release")]
    pub release: bool,
}

fn default_release() -> bool {
    true
}

impl Default for PluginSettings {
    fn default() -> Self {
        let base = base_dir();
        Self {
            source_dir: base.join("plugins"),
            output_dir: base.join("plugins").join("build"),
            paths: Vec::new(),
            release: default_release(),
        }
    }
}

/// Result storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory each run's record directory is created in.
    pub records_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            records_dir: base_dir().join("records"),
        }
    }
}

/// Returns `~/.flightdeck`, or `.flightdeck` when there is no home directory.
fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".flightdeck")
}

impl RunSettings {
    /// Loads settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parses settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serializes the settings to pretty JSON.
    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Looks up `key` in the options object of `extension`.
    pub fn option(&self, extension: &str, key: &str) -> Option<&serde_json::Value> {
        self.options.get(extension)?.get(key)
    }

    /// Looks up a numeric option of `extension`.
    pub fn option_f64(&self, extension: &str, key: &str) -> Option<f64> {
        self.option(extension, key)?.as_f64()
    }
}
