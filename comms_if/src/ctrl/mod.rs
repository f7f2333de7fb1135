//! # Control Outputs
//!
//! This module defines the messages produced by the executable on each cycle.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod drive;
pub mod ref_traj;
pub mod viz;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use drive::DriveCmd;
pub use ref_traj::{RefTraj, RefTrajError, REF_TRAJ_STATE_DIM};
pub use viz::{PoseMarker, PoseMarkerArray};
