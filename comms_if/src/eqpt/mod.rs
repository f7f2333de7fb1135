//! # Equipment Interface
//!
//! This module defines the sensor messages which are delivered to the executable, and the
//! envelope used to carry either of them through a replay script.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod odom;
pub mod scan;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use odom::Odometry;
pub use scan::LaserScan;

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

/// A single sensor message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SensorMsg {
    /// Pose and twist telemetry, each of which triggers a control cycle.
    Odom(Odometry),

    /// A full resolution range scan.
    Scan(LaserScan),
}

/// Errors which can occur while parsing a sensor message.
#[derive(Debug, Error)]
pub enum SensorMsgParseError {
    #[error("Could not parse the sensor message JSON: {0}")]
    JsonError(serde_json::Error),
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl SensorMsg {
    /// Parse a sensor message from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self, SensorMsgParseError> {
        serde_json::from_str(json_str).map_err(SensorMsgParseError::JsonError)
    }

    /// Return the stamp of the message in seconds.
    pub fn stamp_s(&self) -> f64 {
        match self {
            SensorMsg::Odom(o) => o.stamp_s,
            SensorMsg::Scan(s) => s.stamp_s,
        }
    }
}
