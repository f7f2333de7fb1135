//! # Communications interface crate.
//!
//! Provides all common interface messages for the software, both those consumed by the reference
//! trajectory executable and those it produces.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Sensor messages (odometry and laser scans) consumed by the executable
pub mod eqpt;

/// Control outputs (drive commands, reference trajectories and visualisation markers)
pub mod ctrl;
