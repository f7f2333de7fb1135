//! # Laser Scan Message

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A planar range scan.
///
/// Readings are ordered from `angle_min` to `angle_max` in steps of `angle_increment`, all angles
/// measured anticlockwise from the sensor's X axis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LaserScan {
    /// Time of the measurement in seconds
    #[serde(default)]
    pub stamp_s: f64,

    /// Angle of the first reading
    ///
    /// Units: radians
    pub angle_min: f64,

    /// Angle of the last reading
    ///
    /// Units: radians
    pub angle_max: f64,

    /// Angular distance between readings
    ///
    /// Units: radians
    pub angle_increment: f64,

    /// Minimum valid range
    ///
    /// Units: meters
    pub range_min: f64,

    /// Maximum valid range
    ///
    /// Units: meters
    pub range_max: f64,

    /// Range readings
    ///
    /// Units: meters
    pub ranges: Vec<f32>,
}

impl LaserScan {
    /// Return the angle of each reading in the scan.
    pub fn angles(&self) -> Vec<f64> {
        (0..self.ranges.len())
            .map(|i| self.angle_min + (i as f64) * self.angle_increment)
            .collect()
    }
}
