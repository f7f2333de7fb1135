//! # Odometry Message

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pose and twist of the vehicle, as published by the localisation source (the simulator's
/// ground truth or the particle filter on the real car).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Odometry {
    /// Time of the measurement in seconds
    #[serde(default)]
    pub stamp_s: f64,

    /// Pose of the vehicle in the map frame
    pub pose: OdomPose,

    /// Twist of the vehicle
    pub twist: OdomTwist,
}

/// Position and orientation in the map frame.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OdomPose {
    /// Position `[x, y, z]`
    ///
    /// Units: meters
    pub position: [f64; 3],

    /// Orientation quaternion `[x, y, z, w]`
    pub orientation: [f64; 4],
}

/// Linear and angular velocity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct OdomTwist {
    /// Linear velocity `[x, y, z]`
    ///
    /// Units: meters/second
    pub linear: [f64; 3],

    /// Angular velocity `[x, y, z]`
    ///
    /// Units: radians/second
    pub angular: [f64; 3],
}
