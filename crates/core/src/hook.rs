//! Step hooks invoked around each integration step.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in the step loop at which extensions are invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Before the integrator advances the state.
    BeforeStep,

    /// After the integrator advanced the state.
    AfterStep,
}

impl Hook {
    /// Returns the hook name as used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::BeforeStep => "before_step",
            Hook::AfterStep => "after_step",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
