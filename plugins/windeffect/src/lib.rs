//! Lateral wind whose acceleration varies sinusoidally with time.
//!
//! Options (under `"windeffect"`):
//! - `wind_speed`: peak wind acceleration in m/s², default `5.0`.

use flightdeck_core::{Extension, ExtensionError, Logger, PhysicsState, Result, RunSettings};

const DEFAULT_WIND_SPEED: f64 = 5.0;

#[derive(Debug)]
pub struct WindEffect {
    logger: Option<Logger>,
    wind_speed: f64,
}

impl Default for WindEffect {
    fn default() -> Self {
        Self {
            logger: None,
            wind_speed: DEFAULT_WIND_SPEED,
        }
    }
}

impl Extension for WindEffect {
    fn initialize(&mut self, logger: Logger, settings: &RunSettings) -> Result<()> {
        if let Some(speed) = settings.option_f64("windeffect", "wind_speed") {
            if !speed.is_finite() {
                return Err(ExtensionError::InvalidOption {
                    name: "wind_speed".to_string(),
                    reason: format!("must be finite, got {speed}"),
                });
            }
            self.wind_speed = speed;
        }

        logger.info(format!("wind speed {} m/s²", self.wind_speed));
        self.logger = Some(logger);
        Ok(())
    }

    fn name(&self) -> &str {
        "WindEffect"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Adds `m · wind_speed · sin(t)` to the accumulated x force.
    fn before_step(&mut self, state: &mut PhysicsState) -> Result<()> {
        let acceleration = self.wind_speed * state.time.sin();
        let force = state.mass * acceleration;
        state.accumulated_force.x += force;

        if let Some(logger) = &self.logger {
            logger.trace(format!(
                "t={:.3} wind_accel_x={acceleration:.4} force_x={force:.4}",
                state.time
            ));
        }
        Ok(())
    }
}

flightdeck_core::export_extension!(WindEffect::default());
