//! Fixed-step loop honouring the extension hook contract.
//!
//! Physics cores that integrate with a fixed step can drive their integrator
//! through [`StepLoop`] so that every step calls the registry's hooks in the
//! required order:
//!
//! 1. `before_step` on every extension, in registration order
//! 2. the integrator advances the state by `dt`
//! 3. `state.time += dt`
//! 4. `after_step` on every extension, in registration order
//! 5. the observer sees the final state of the step

use flightdeck_core::{PhysicsState, SimulationSettings};
use flightdeck_plugin::{ExtensionRegistry, PluginError};
use thiserror::Error;
use tracing::debug;

use crate::collaborators::BoxError;

/// Advances a physics state by one step.
pub trait Integrator {
    /// Advances `state` by `dt` seconds. Returns `true` once the flight is over.
    fn advance(&mut self, state: &mut PhysicsState, dt: f64) -> Result<bool, BoxError>;
}

/// A step that could not be completed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step {step} failed")]
    Hook {
        step: u64,
        #[source]
        source: PluginError,
    },

    #[error("Integrator failed at step {step}")]
    Integrator {
        step: u64,
        #[source]
        source: BoxError,
    },

    #[error("Failed to record step {step}")]
    Observer {
        step: u64,
        #[source]
        source: BoxError,
    },
}

/// How a loop ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepSummary {
    /// Number of completed steps.
    pub steps: u64,

    /// Simulated time at the end of the loop.
    pub time: f64,

    /// Whether the integrator reported completion before `max_time`.
    pub finished: bool,
}

/// Drives an [`Integrator`] with the registry's hooks around each step.
#[derive(Debug, Clone)]
pub struct StepLoop {
    registry: ExtensionRegistry,
    step: f64,
    max_time: f64,
}

impl StepLoop {
    pub fn new(registry: ExtensionRegistry, settings: &SimulationSettings) -> Self {
        Self {
            registry,
            step: settings.step,
            max_time: settings.max_time,
        }
    }

    /// Number of steps that cover `max_time` from zero.
    pub fn max_steps(&self) -> u64 {
        if self.step <= 0.0 || !self.step.is_finite() {
            return 0;
        }
        // Absorbs representation error, e.g. 1.0 / 0.1.
        (self.max_time / self.step - 1e-9).ceil().max(0.0) as u64
    }

    /// Runs until `max_time` is covered or the integrator reports completion.
    ///
    /// The first failing hook ends the loop; `state` keeps the mutations
    /// made up to that point.
    pub fn run<I, F>(
        &self,
        state: &mut PhysicsState,
        integrator: &mut I,
        mut observe: F,
    ) -> Result<StepSummary, StepError>
    where
        I: Integrator + ?Sized,
        F: FnMut(&PhysicsState) -> Result<(), BoxError>,
    {
        let max_steps = self.max_steps();
        let mut finished = false;
        let mut step = 0;

        while step < max_steps && !finished {
            self.registry
                .invoke_before_step(state)
                .map_err(|source| StepError::Hook { step, source })?;

            finished = integrator
                .advance(state, self.step)
                .map_err(|source| StepError::Integrator { step, source })?;
            state.time += self.step;

            self.registry
                .invoke_after_step(state)
                .map_err(|source| StepError::Hook { step, source })?;

            observe(state).map_err(|source| StepError::Observer { step, source })?;
            step += 1;
        }

        debug!(steps = step, time = state.time, finished, "Step loop ended");
        Ok(StepSummary {
            steps: step,
            time: state.time,
            finished,
        })
    }
}
