//! # Reference Trajectory Manager
//!
//! Runs one cycle per odometry update. Each cycle estimates the vehicle state, runs the policy on
//! the real observation, and then either publishes the action as a drive command or hands it to the
//! rollout worker to predict a reference trajectory.
//!
//! Scans are handled separately as they arrive, the cycle uses whichever scan is latest when it
//! starts.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod state;

pub use state::*;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::ctrl::{DriveCmd, PoseMarkerArray, RefTraj};
use nalgebra::Point2;
use serde::Serialize;
use thiserror::Error;
use util::archive::ArchiveError;

use crate::{
    params::ParamsError,
    policy::{ControlAction, PolicyError},
    rollout::{RolloutError, RolloutMgr},
    scan_proc::ScanProcError,
    state_est::{HeadingCommand, StateEstError, VehicleState},
    traj_fmt::TrajFmtError,
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The per-cycle behaviour, selected once at initialisation.
pub enum CycleMode {
    /// Publish the policy's action as a drive command
    Drive,

    /// Predict a reference trajectory on the rollout worker
    Plan(RolloutMgr),
}

/// Output of the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum RlOutput {
    Drive(DriveCmd),

    RefTraj {
        /// ID of the cycle the trajectory was generated for
        cycle_id: u64,

        /// Trajectory at the controller's timestep
        traj: RefTraj,

        /// Markers for each simulated pose
        markers: PoseMarkerArray,

        /// World frame points of the scan the cycle started from
        scan_points: Vec<Point2<f64>>,
    },
}

#[derive(Debug, Error)]
pub enum RlMgrError {
    #[error("The manager has not been initialised")]
    NotInitialised,

    #[error("Invalid parameters: {0}")]
    ParamsError(ParamsError),

    #[error("The policy expects {policy} beams but {configured} are configured")]
    BeamCountMismatch { policy: usize, configured: usize },

    #[error("Plan mode requires a forward simulator")]
    NoSimulator,

    #[error("State estimation error: {0}")]
    StateEstError(StateEstError),

    #[error("Scan processing error: {0}")]
    ScanProcError(ScanProcError),

    #[error("Policy error: {0}")]
    PolicyError(PolicyError),

    #[error("Rollout error: {0}")]
    RolloutError(RolloutError),

    #[error("Trajectory formatting error: {0}")]
    TrajFmtError(TrajFmtError),

    #[error("Could not initialise archives: {0}")]
    ArchiveError(ArchiveError),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Status report for one cycle.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusReport {
    /// ID of the cycle
    pub cycle_id: u64,

    /// Estimated state of the vehicle
    pub state: VehicleState,

    /// Action from the policy on the real state
    pub action: ControlAction,

    /// Heading given to the policy on this cycle, issued on the previous one
    pub heading_in: HeadingCommand,

    /// True if a rollout was requested
    pub rollout_requested: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl std::fmt::Debug for CycleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleMode::Drive => write!(f, "Drive"),
            CycleMode::Plan(m) => write!(f, "Plan(horizon = {})", m.horizon()),
        }
    }
}

impl From<ParamsError> for RlMgrError {
    fn from(e: ParamsError) -> Self {
        Self::ParamsError(e)
    }
}

impl From<StateEstError> for RlMgrError {
    fn from(e: StateEstError) -> Self {
        Self::StateEstError(e)
    }
}

impl From<ScanProcError> for RlMgrError {
    fn from(e: ScanProcError) -> Self {
        Self::ScanProcError(e)
    }
}

impl From<PolicyError> for RlMgrError {
    fn from(e: PolicyError) -> Self {
        Self::PolicyError(e)
    }
}

impl From<RolloutError> for RlMgrError {
    fn from(e: RolloutError) -> Self {
        Self::RolloutError(e)
    }
}

impl From<TrajFmtError> for RlMgrError {
    fn from(e: TrajFmtError) -> Self {
        Self::TrajFmtError(e)
    }
}

impl From<ArchiveError> for RlMgrError {
    fn from(e: ArchiveError) -> Self {
        Self::ArchiveError(e)
    }
}
