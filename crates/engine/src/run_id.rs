//! Content-derived run identifiers.

use std::fmt;

use flightdeck_core::{RunSettings, SettingsError};

/// Length of [`RunId::short`].
const SHORT_LEN: usize = 8;

/// Identifier of a run, derived from everything that determines its output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    /// Hashes the settings and both specifications with blake3.
    ///
    /// Each input is length-prefixed so that moving bytes from one input to
    /// the next changes the identifier.
    pub fn compute(
        settings: &RunSettings,
        vehicle: &[u8],
        propulsion: &[u8],
    ) -> Result<Self, SettingsError> {
        let settings = serde_json::to_vec(settings)?;

        let mut hasher = blake3::Hasher::new();
        for part in [settings.as_slice(), vehicle, propulsion] {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }

        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    /// Full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading hex characters, for display.
    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN.min(self.0.len())]
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let settings = RunSettings::default();
        let a = RunId::compute(&settings, b"vehicle", b"motor").unwrap();
        let b = RunId::compute(&settings, b"vehicle", b"motor").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 8);
        assert!(a.as_str().starts_with(a.short()));
    }

    #[test]
    fn test_sensitive_to_every_input() {
        let settings = RunSettings::default();
        let base = RunId::compute(&settings, b"vehicle", b"motor").unwrap();

        let mut finer = settings.clone();
        finer.simulation.step = 0.0005;
        assert_ne!(base, RunId::compute(&finer, b"vehicle", b"motor").unwrap());
        assert_ne!(base, RunId::compute(&settings, b"vehicle2", b"motor").unwrap());
        assert_ne!(base, RunId::compute(&settings, b"vehicle", b"motor2").unwrap());
        assert_ne!(base, RunId::compute(&settings, b"vehiclem", b"otor").unwrap());
    }
}
