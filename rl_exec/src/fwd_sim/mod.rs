//! # Forward Simulation
//!
//! The rollout predicts the future by stepping a forward simulator with the policy's actions. Any
//! simulator implementing `FwdSim` can be used, `StSim` is a single-track kinematic model with a
//! ray cast scan over a world made of wall segments.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod scan_sim;
mod st_sim;

pub use scan_sim::{ScanSim, ScanSimParams};
pub use st_sim::StSim;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::LaserScan;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{policy::ControlAction, state_est::VehicleState};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A forward simulator of the vehicle and its range sensor.
pub trait FwdSim: Send {
    /// Place the vehicle at `[x, y, yaw]` at rest with zero steering.
    fn reset(&mut self, pose: [f64; 3]) -> Result<(), FwdSimError>;

    /// Apply the action for one timestep and observe the result.
    fn step(&mut self, action: &ControlAction) -> Result<SimObservation, FwdSimError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The vehicle state and full resolution scan after a simulation step.
#[derive(Debug, Clone, PartialEq)]
pub struct SimObservation {
    pub state: VehicleState,
    pub scan: LaserScan,
}

/// Parameters of the reference forward simulator, loaded from `fwd_sim.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FwdSimParams {
    /// Numerical integration method
    pub integrator: Integrator,

    // ---- STEERING SERVO ----
    /// Proportional gain from steering error to steering rate
    ///
    /// Units: 1/seconds
    pub steer_servo_gain: f64,

    /// Units: radians/second
    pub max_steer_rate_rads: f64,

    /// Mechanical steering limit
    ///
    /// Units: radians
    pub steer_limit_rad: f64,

    // ---- SPEED SERVO ----
    /// Proportional gain from speed error to acceleration
    ///
    /// Units: 1/seconds
    pub speed_servo_gain: f64,

    /// Units: meters/second^2
    pub max_accel_mss: f64,

    /// Units: meters/second
    pub min_speed_ms: f64,

    /// Units: meters/second
    pub max_speed_ms: f64,

    // ---- SCAN ----
    pub scan: ScanSimParams,

    /// Walls of the simulated world as `[x0, y0, x1, y1]`
    ///
    /// Units: meters
    #[serde(default)]
    pub walls: Vec<[f64; 4]>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Integrator {
    Euler,
    Rk4,
}

#[derive(Debug, Error, PartialEq)]
pub enum FwdSimError {
    #[error("Cannot reset the simulator to a non-finite pose {0:?}")]
    InvalidPose([f64; 3]),

    #[error("The simulator must be reset before it is stepped")]
    NotReset,

    #[error("Action {0:?} is not finite")]
    InvalidAction(ControlAction),

    #[error("The simulated state diverged to a non-finite value")]
    Diverged,

    #[error("Invalid simulator parameters: {0}")]
    InvalidParams(String),
}
