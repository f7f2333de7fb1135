//! # Visualisation Markers

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An arrow marker showing a single predicted pose.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoseMarker {
    /// Unique id of the marker within its array
    pub id: usize,

    /// Frame the marker is expressed in
    pub frame_id: String,

    /// Marker namespace
    pub ns: String,

    /// Position `[x, y, z]`
    ///
    /// Units: meters
    pub position: [f64; 3],

    /// Orientation quaternion `[x, y, z, w]`
    pub orientation: [f64; 4],

    /// Arrow scale `[length, width, height]`
    ///
    /// Units: meters
    pub scale: [f64; 3],

    /// Colour `[r, g, b, a]`
    pub colour: [f32; 4],
}

/// Ordered set of predicted pose markers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PoseMarkerArray {
    pub markers: Vec<PoseMarker>,
}
