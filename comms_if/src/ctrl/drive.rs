//! # Drive Command

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An ackermann drive command in physical units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DriveCmd {
    /// UTC time at which the command was issued
    pub timestamp: DateTime<Utc>,

    /// Front wheel steering angle, positive to the left.
    ///
    /// Units: radians
    pub steering_angle_rad: f64,

    /// Longitudinal speed demand.
    ///
    /// Units: meters/second
    pub speed_ms: f64,
}
