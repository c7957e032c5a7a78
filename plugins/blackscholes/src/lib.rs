//! Atmospheric turbulence as a random walk on velocity.
//!
//! After every step each velocity component receives normal noise with
//! standard deviation `σ · |v| · √dt`.
//!
//! Options (under `"blackscholes"`):
//! - `turbulence_intensity`: σ, default `0.05`
//! - `seed`: RNG seed; a random seed is drawn when absent

use flightdeck_core::{Extension, ExtensionError, Logger, PhysicsState, Result, RunSettings};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const DEFAULT_INTENSITY: f64 = 0.05;

#[derive(Debug)]
pub struct BlackScholes {
    logger: Option<Logger>,
    rng: StdRng,
    intensity: f64,
    dt: f64,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self {
            logger: None,
            rng: StdRng::seed_from_u64(1),
            intensity: DEFAULT_INTENSITY,
            dt: 1.0,
        }
    }
}

impl BlackScholes {
    fn standard_normal(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }
}

impl Extension for BlackScholes {
    fn initialize(&mut self, logger: Logger, settings: &RunSettings) -> Result<()> {
        if let Some(intensity) = settings.option_f64("blackscholes", "turbulence_intensity") {
            if !intensity.is_finite() || intensity < 0.0 {
                return Err(ExtensionError::InvalidOption {
                    name: "turbulence_intensity".to_string(),
                    reason: format!("must be a finite non-negative number, got {intensity}"),
                });
            }
            self.intensity = intensity;
        }

        let seed = match settings.option("blackscholes", "seed") {
            Some(value) => value.as_u64().ok_or_else(|| ExtensionError::InvalidOption {
                name: "seed".to_string(),
                reason: format!("must be an unsigned integer, got {value}"),
            })?,
            None => rand::thread_rng().r#gen(),
        };
        self.rng = StdRng::seed_from_u64(seed);
        self.dt = settings.simulation.step;

        logger.info(format!(
            "turbulence intensity {} with seed {seed}",
            self.intensity
        ));
        self.logger = Some(logger);
        Ok(())
    }

    fn name(&self) -> &str {
        "blackscholes"
    }

    fn version(&self) -> &str {
        "0.1.1"
    }

    fn after_step(&mut self, state: &mut PhysicsState) -> Result<()> {
        if self.intensity == 0.0 {
            return Ok(());
        }

        let std_dev = self.intensity * state.velocity.magnitude() * self.dt.sqrt();
        state.velocity.x += self.standard_normal() * std_dev;
        state.velocity.y += self.standard_normal() * std_dev;
        state.velocity.z += self.standard_normal() * std_dev;
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        if let Some(logger) = &self.logger {
            logger.info("cleaning up turbulence model");
        }
        Ok(())
    }
}

flightdeck_core::export_extension!(BlackScholes::default());

#[cfg(test)]
mod tests {
    use super::*;
    use flightdeck_core::{NullSink, Vector3};
    use std::sync::Arc;

    fn initialized(json: &str) -> BlackScholes {
        let settings = RunSettings::from_json(json).unwrap();
        let mut model = BlackScholes::default();
        model
            .initialize(Logger::new(Arc::new(NullSink)), &settings)
            .unwrap();
        model
    }

    const SEEDED: &str = r#"{"simulation":{"step":0.01,"max_time":10.0},"options":{"blackscholes":{"seed":7}}}"#;

    #[test]
    fn test_same_seed_same_perturbation() {
        let mut a = initialized(SEEDED);
        let mut b = initialized(SEEDED);
        let mut sa = PhysicsState::with_mass(1.0);
        sa.velocity = Vector3::new(0.0, 0.0, 100.0);
        let mut sb = sa.clone();

        a.after_step(&mut sa).unwrap();
        b.after_step(&mut sb).unwrap();

        assert_eq!(sa.velocity, sb.velocity);
        assert_ne!(sa.velocity, Vector3::new(0.0, 0.0, 100.0));
    }

    #[test]
    fn test_noise_is_standard_normal() {
        let mut model = initialized(SEEDED);
        let samples: Vec<f64> = (0..20_000).map(|_| model.standard_normal()).collect();

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance =
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((variance - 1.0).abs() < 0.05, "variance {variance}");
    }

    #[test]
    fn test_at_rest_is_unperturbed() {
        let mut model = initialized(SEEDED);
        let mut state = PhysicsState::with_mass(1.0);

        model.after_step(&mut state).unwrap();
        assert_eq!(state.velocity, Vector3::ZERO);
    }

    #[test]
    fn test_rejects_negative_intensity() {
        let settings = RunSettings::from_json(
            r#"{"options":{"blackscholes":{"turbulence_intensity":-1.0}}}"#,
        )
        .unwrap();
        let err = BlackScholes::default()
            .initialize(Logger::new(Arc::new(NullSink)), &settings)
            .unwrap_err();
        assert!(err.to_string().contains("turbulence_intensity"));
    }
}
