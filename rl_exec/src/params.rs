//! # Reference Trajectory Executable Parameters
//!
//! This module provides the parameters for the reference trajectory executable, loaded from
//! `rl_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Tolerance used when checking that the outer timestep is an integer multiple of the inner one.
const RATIO_TOLERANCE: f64 = 1e-6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RlParams {
    // ---- OUTPUT ----
    /// Whether each cycle publishes a drive command or a reference trajectory
    pub mode: OutputMode,

    /// True if odometry comes from the simulator's ground truth rather than the particle filter
    pub is_sim: bool,

    /// What to publish when a planning cycle fails
    #[serde(default)]
    pub on_rollout_failure: FailurePolicy,

    /// Frame ID used for the visualisation markers
    #[serde(default = "default_marker_frame_id")]
    pub marker_frame_id: String,

    // ---- HORIZON ----
    /// Number of beams in the scan given to the policy
    pub num_beams: usize,

    /// Number of output steps in the reference trajectory
    pub n_steps: usize,

    /// Timestep between reference trajectory rows (the controller's timestep)
    ///
    /// Units: seconds
    pub sim_time_step_s: f64,

    /// Timestep of the forward simulation (the policy's timestep)
    ///
    /// Units: seconds
    pub rl_sim_time_step_s: f64,

    // ---- VEHICLE ----
    /// Distance from the centre of gravity to the front axle
    ///
    /// Units: meters
    pub lf_m: f64,

    /// Distance from the centre of gravity to the rear axle
    ///
    /// Units: meters
    pub lr_m: f64,

    /// Steering angle corresponding to a normalised policy output of 1
    ///
    /// Units: radians
    pub steer_max_rad: f64,

    /// Speed corresponding to a normalised policy output of 1
    ///
    /// Units: meters/second
    pub speed_max_ms: f64,

    // ---- EXEC ----
    /// Range given to every beam before the first scan arrives
    ///
    /// Units: meters
    pub initial_scan_range_m: f32,

    /// Target period of one main loop cycle
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Path to the policy weights, relative to `$RL_TRAJ_SW_ROOT` if not absolute
    pub policy_weights_path: PathBuf,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The output produced by each cycle, fixed for the lifetime of the executable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputMode {
    /// Publish the policy's action directly as a drive command
    Drive,

    /// Roll the policy forward and publish a reference trajectory
    Plan,
}

/// What to publish when a planning cycle fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Publish nothing for the failed cycle
    Suppress,

    /// Publish the last successfully generated trajectory again
    RepublishLast,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("The number of beams must be greater than zero")]
    ZeroBeams,

    #[error("The number of steps must be greater than zero")]
    ZeroSteps,

    #[error("Timesteps must be positive and finite (outer = {0} s, inner = {1} s)")]
    InvalidTimeStep(f64, f64),

    #[error(
        "The outer timestep ({0} s) must be an integer multiple of the inner timestep ({1} s)"
    )]
    NonIntegerRatio(f64, f64),

    #[error("Vehicle geometry and control limits must be positive")]
    InvalidVehicle,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RlParams {
    /// Check the parameters are consistent.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.num_beams == 0 {
            return Err(ParamsError::ZeroBeams);
        }
        if self.n_steps == 0 {
            return Err(ParamsError::ZeroSteps);
        }
        if self.lf_m <= 0.0 || self.lr_m <= 0.0 || self.steer_max_rad <= 0.0 || self.speed_max_ms <= 0.0 {
            return Err(ParamsError::InvalidVehicle);
        }

        self.resample_ratio().map(|_| ())
    }

    /// Number of inner simulation steps per output step.
    pub fn resample_ratio(&self) -> Result<usize, ParamsError> {
        resample_ratio(self.sim_time_step_s, self.rl_sim_time_step_s)
    }

    /// Total number of inner simulation steps in the horizon.
    pub fn horizon(&self) -> Result<usize, ParamsError> {
        Ok(self.n_steps * self.resample_ratio()?)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Suppress
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Compute the integer ratio between the outer and inner timesteps.
pub fn resample_ratio(outer_dt_s: f64, inner_dt_s: f64) -> Result<usize, ParamsError> {
    if !(outer_dt_s.is_finite() && inner_dt_s.is_finite()) || outer_dt_s <= 0.0 || inner_dt_s <= 0.0
    {
        return Err(ParamsError::InvalidTimeStep(outer_dt_s, inner_dt_s));
    }

    let ratio = outer_dt_s / inner_dt_s;
    let rounded = ratio.round();

    if rounded < 1.0 || (ratio - rounded).abs() > RATIO_TOLERANCE * ratio.max(1.0) {
        return Err(ParamsError::NonIntegerRatio(outer_dt_s, inner_dt_s));
    }

    Ok(rounded as usize)
}

fn default_marker_frame_id() -> String {
    String::from("map")
}
