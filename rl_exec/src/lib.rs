//! # Reference trajectory library.
//!
//! Generates short-horizon reference trajectories by alternating a learned control policy with a
//! forward simulation of the vehicle. The executable in `main.rs` drives these modules from a
//! replayed sensor stream, other crates in the workspace (and the benchmarks) can use them
//! directly.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Global data store for the executable
pub mod data_store;

/// Forward simulator - predicts the vehicle state and scan after applying an action
pub mod fwd_sim;

/// Executable parameters
pub mod params;

/// Policy inference - invokes the learned policy and scales its output into physical units
pub mod policy;

/// Reference trajectory manager - runs one cycle per odometry update
pub mod rl_mgr;

/// Forward rollout engine and its worker thread
pub mod rollout;

/// Scan preprocessing - downsamples full resolution scans to the policy's beam count
pub mod scan_proc;

/// State estimation - converts odometry into the vehicle state
pub mod state_est;

/// Trajectory formatting - converts rollout states into the controller's state convention
pub mod traj_fmt;

/// Visualisation markers for predicted poses
pub mod viz;
