//! Validation of run-level numeric settings.

use flightdeck_core::SimulationSettings;

use crate::error::{EngineError, Result};

/// Largest integration step accepted, in seconds.
pub const MAX_STEP: f64 = 0.1;

/// Checks the integration step and the simulated time bound.
pub fn validate_simulation(settings: &SimulationSettings) -> Result<()> {
    let step = settings.step;
    if !step.is_finite() || step <= 0.0 || step > MAX_STEP {
        return Err(EngineError::InvalidSetting {
            field: "step",
            reason: format!("must be > 0 and <= {MAX_STEP}, got {step}"),
        });
    }

    let max_time = settings.max_time;
    if !max_time.is_finite() || max_time <= 0.0 {
        return Err(EngineError::InvalidSetting {
            field: "max_time",
            reason: format!("must be > 0, got {max_time}"),
        });
    }

    Ok(())
}
