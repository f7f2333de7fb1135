//! # Policy Inference
//!
//! The learned policy maps an observation of the vehicle and its surroundings to a normalised
//! control action. This module packages observations into the policy's fixed-shape inputs, invokes
//! a `PolicyBackend`, and converts the raw output into physical units.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod mlp;

pub use mlp::{Activation, MlpPolicy};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{path::PathBuf, sync::Arc};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    scan_proc::ScanBuffer,
    state_est::{HeadingCommand, VehicleState},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Names of the policy inputs, in the order they appear in `ObservationBundle::inputs`.
pub const INPUT_NAMES: [&str; 4] = ["scan", "pose", "vel", "heading"];

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A policy model which can be invoked with an observation.
///
/// Backends must be shareable between the cycle and the rollout worker.
pub trait PolicyBackend: Send + Sync {
    /// Shapes of the `scan`, `pose`, `vel` and `heading` inputs.
    fn input_shapes(&self) -> [(usize, usize); 4];

    /// Run the model, returning its output tensors.
    fn run(&self, obs: &ObservationBundle) -> Result<Vec<Array2<f32>>, PolicyError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The four inputs to the policy, each a single row tensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationBundle {
    /// Shape `(1, num_beams)`
    pub scan: Array2<f32>,

    /// `[x, y, yaw]`, shape `(1, 3)`
    pub pose: Array2<f32>,

    /// `[vx, vy, yaw_rate]`, shape `(1, 3)`
    pub vel: Array2<f32>,

    /// `[steer, slip_angle]`, shape `(1, 2)`
    pub heading: Array2<f32>,
}

/// A control action in physical units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlAction {
    /// Units: radians
    pub steer: f64,

    /// Units: meters/second
    pub speed: f64,
}

/// Invokes a policy backend and scales its output.
#[derive(Clone)]
pub struct PolicyAdapter {
    backend: Arc<dyn PolicyBackend>,
    steer_max_rad: f64,
    speed_max_ms: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy weights could not be loaded from {0:?}: {1}")]
    BackendUnavailable(PathBuf, std::io::Error),

    #[error("Policy weights file is invalid: {0}")]
    InvalidWeights(String),

    #[error("Input {name} has shape {found:?} but the policy expects {expected:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Policy produced no output with at least 2 values")]
    EmptyOutput,

    #[error("Policy produced a NaN action")]
    NanOutput,

    #[error("Policy inference failed: {0}")]
    InferenceFailed(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ObservationBundle {
    /// Build the observation from the current scan, state and heading.
    pub fn new(scan: &ScanBuffer, state: &VehicleState, heading: &HeadingCommand) -> Self {
        Self {
            scan: row(scan.ranges().iter().copied()),
            pose: row(state.pose().iter().map(|&v| v as f32)),
            vel: row(state.vel().iter().map(|&v| v as f32)),
            heading: row(heading.as_array().iter().map(|&v| v as f32)),
        }
    }

    /// The inputs as `(name, tensor)` pairs.
    pub fn inputs(&self) -> [(&'static str, &Array2<f32>); 4] {
        [
            (INPUT_NAMES[0], &self.scan),
            (INPUT_NAMES[1], &self.pose),
            (INPUT_NAMES[2], &self.vel),
            (INPUT_NAMES[3], &self.heading),
        ]
    }

    /// Concatenate the inputs into one vector, `scan ‖ pose ‖ vel ‖ heading`.
    pub fn flatten(&self) -> Vec<f32> {
        self.inputs()
            .iter()
            .flat_map(|(_, a)| a.iter().copied())
            .collect()
    }
}

impl PolicyAdapter {
    pub fn new(backend: Arc<dyn PolicyBackend>, steer_max_rad: f64, speed_max_ms: f64) -> Self {
        Self {
            backend,
            steer_max_rad,
            speed_max_ms,
        }
    }

    /// Run the policy on the observation.
    ///
    /// The first row of the first output gives `[steer, speed]` normalised to `[-1, 1]`, each is
    /// clipped to that range and then scaled by the per channel maximum.
    pub fn infer(&self, obs: &ObservationBundle) -> Result<ControlAction, PolicyError> {
        let expected = self.backend.input_shapes();

        for ((name, array), exp) in obs.inputs().iter().zip(expected.iter()) {
            let found = array.dim();
            if found != *exp {
                return Err(PolicyError::ShapeMismatch {
                    name: *name,
                    expected: *exp,
                    found,
                });
            }
        }

        let outputs = self.backend.run(obs)?;

        let raw: Vec<f32> = match outputs.first() {
            Some(o) if o.ncols() >= 2 && o.nrows() >= 1 => o.row(0).iter().take(2).copied().collect(),
            _ => return Err(PolicyError::EmptyOutput),
        };

        if raw.iter().any(|v| v.is_nan()) {
            return Err(PolicyError::NanOutput);
        }

        Ok(ControlAction {
            steer: scale(raw[0] as f64, self.steer_max_rad),
            speed: scale(raw[1] as f64, self.speed_max_ms),
        })
    }

    pub fn num_beams(&self) -> usize {
        self.backend.input_shapes()[0].1
    }
}

impl std::fmt::Debug for PolicyAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyAdapter")
            .field("input_shapes", &self.backend.input_shapes())
            .field("steer_max_rad", &self.steer_max_rad)
            .field("speed_max_ms", &self.speed_max_ms)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Input shapes of a policy taking `num_beams` scan readings.
pub fn input_shapes_for(num_beams: usize) -> [(usize, usize); 4] {
    [(1, num_beams), (1, 3), (1, 3), (1, 2)]
}

fn row<I: Iterator<Item = f32>>(values: I) -> Array2<f32> {
    let v: Vec<f32> = values.collect();
    let n = v.len();
    Array2::from_shape_vec((1, n), v).unwrap_or_else(|_| Array2::zeros((1, n)))
}

/// Clip a normalised value to `[-1, 1]` and scale it to `[-max, max]`.
fn scale(raw: f64, max: f64) -> f64 {
    util::maths::lin_map(
        (-1.0, 1.0),
        (-max, max),
        util::maths::clamp(&raw, &-1.0, &1.0),
    )
}
