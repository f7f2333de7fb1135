//! # Visualisation
//!
//! Arrow markers showing the poses predicted by the rollout.

use comms_if::ctrl::{PoseMarker, PoseMarkerArray};

use crate::rollout::RolloutStep;

/// Namespace of the predicted pose markers
pub const MARKER_NS: &str = "poses";

/// Arrow length, shaft width and head height
///
/// Units: meters
pub const MARKER_SCALE: [f64; 3] = [0.4, 0.075, 0.05];

/// Opaque red
pub const MARKER_COLOUR: [f32; 4] = [1.0, 0.0, 0.0, 1.0];

/// Build one arrow marker per predicted pose, numbered in order.
///
/// The orientation is a rotation about Z, `[x, y, z, w] = [0, 0, sin(yaw/2), cos(yaw/2)]`.
pub fn pose_markers(steps: &[RolloutStep], frame_id: &str) -> PoseMarkerArray {
    let markers = steps
        .iter()
        .enumerate()
        .map(|(id, s)| {
            let half_yaw = s.state.yaw / 2.0;

            PoseMarker {
                id,
                frame_id: frame_id.to_string(),
                ns: MARKER_NS.to_string(),
                position: [s.state.x, s.state.y, 0.0],
                orientation: [0.0, 0.0, half_yaw.sin(), half_yaw.cos()],
                scale: MARKER_SCALE,
                colour: MARKER_COLOUR,
            }
        })
        .collect();

    PoseMarkerArray { markers }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state_est::{heading_from_w, VehicleState};

    #[test]
    fn test_markers() {
        let steps: Vec<RolloutStep> = (0..3)
            .map(|i| RolloutStep {
                state: VehicleState {
                    x: i as f64,
                    y: 1.0,
                    yaw: 0.5 * i as f64,
                    ..Default::default()
                },
                steer: 0.0,
            })
            .collect();

        let array = pose_markers(&steps, "map");

        assert_eq!(array.markers.len(), 3);
        for (i, m) in array.markers.iter().enumerate() {
            assert_eq!(m.id, i);
            assert_eq!(m.frame_id, "map");
            assert_eq!(m.ns, "poses");
            assert_eq!(m.position[0], i as f64);

            // The quaternion round trips through the odometry heading
            assert!((heading_from_w(m.orientation[3]) - 0.5 * i as f64).abs() < 1e-9);
        }

        assert!(pose_markers(&[], "map").markers.is_empty());
    }
}
