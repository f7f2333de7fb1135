//! # State Estimation
//!
//! Converts odometry telemetry into the internal vehicle state, and holds the heading command which
//! is carried between cycles.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::Odometry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Planar state of the vehicle in the world frame.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct VehicleState {
    /// Units: meters
    pub x: f64,

    /// Units: meters
    pub y: f64,

    /// Heading, not wrapped
    ///
    /// Units: radians
    pub yaw: f64,

    /// Units: radians/second
    pub yaw_rate: f64,

    /// Units: meters/second
    pub vx: f64,

    /// Units: meters/second
    pub vy: f64,
}

/// The last steering command issued and its kinematic slip angle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct HeadingCommand {
    /// Units: radians
    pub steer: f64,

    /// Units: radians
    pub slip_angle: f64,
}

/// Converts odometry messages into `VehicleState`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct StateEstimator;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum StateEstError {
    #[error("Odometry position or velocity contains a non-finite value")]
    NonFiniteInput,

    #[error("Odometry orientation W component is not finite ({0})")]
    InvalidOrientation(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VehicleState {
    /// Returns `[x, y, yaw]`
    pub fn pose(&self) -> [f64; 3] {
        [self.x, self.y, self.yaw]
    }

    /// Returns `[vx, vy, yaw_rate]`
    pub fn vel(&self) -> [f64; 3] {
        [self.vx, self.vy, self.yaw_rate]
    }

    /// Returns true if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.pose().iter().chain(self.vel().iter()).all(|v| v.is_finite())
    }
}

impl HeadingCommand {
    /// Build a heading command from a steering angle, using the kinematic bicycle slip angle
    /// `atan(lr * tan(steer) / (lf + lr))`.
    pub fn from_steer(steer: f64, lf_m: f64, lr_m: f64) -> Self {
        Self {
            steer,
            slip_angle: kinematic_slip(steer, lf_m, lr_m),
        }
    }

    /// Returns `[steer, slip_angle]`
    pub fn as_array(&self) -> [f64; 2] {
        [self.steer, self.slip_angle]
    }
}

impl StateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the vehicle state from an odometry message.
    ///
    /// The orientation is assumed to be a pure rotation about the vertical axis, giving
    /// `yaw = 2 * acos(w)`. The `w` component is clamped to `[-1, 1]` so that small normalisation
    /// errors don't produce a NaN yaw.
    pub fn update(&self, odom: &Odometry) -> Result<VehicleState, StateEstError> {
        let w = odom.pose.orientation[3];
        if !w.is_finite() {
            return Err(StateEstError::InvalidOrientation(w));
        }

        let state = VehicleState {
            x: odom.pose.position[0],
            y: odom.pose.position[1],
            yaw: heading_from_w(w),
            yaw_rate: odom.twist.angular[2],
            vx: odom.twist.linear[0],
            vy: odom.twist.linear[1],
        };

        if !state.is_finite() {
            return Err(StateEstError::NonFiniteInput);
        }

        Ok(state)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Heading from the W component of a quaternion rotating about Z only.
pub fn heading_from_w(w: f64) -> f64 {
    2.0 * util::maths::clamp(&w, &-1.0, &1.0).acos()
}

/// Kinematic single-track slip angle for the given steering angle.
pub fn kinematic_slip(steer: f64, lf_m: f64, lr_m: f64) -> f64 {
    (lr_m * steer.tan() / (lf_m + lr_m)).atan()
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::odom::{OdomPose, OdomTwist};
    use std::f64::consts::PI;

    fn odom(position: [f64; 3], w: f64, linear: [f64; 3], yaw_rate: f64) -> Odometry {
        Odometry {
            stamp_s: 0.0,
            pose: OdomPose {
                position,
                orientation: [0.0, 0.0, (1.0 - w * w).max(0.0).sqrt(), w],
            },
            twist: OdomTwist {
                linear,
                angular: [0.0, 0.0, yaw_rate],
            },
        }
    }

    #[test]
    fn test_heading_from_w() {
        assert_eq!(heading_from_w(1.0), 0.0);
        assert!((heading_from_w(0.0) - PI).abs() < 1e-12);
        assert!((heading_from_w(-1.0) - 2.0 * PI).abs() < 1e-12);

        // Out of range values are clamped rather than producing NaN
        assert_eq!(heading_from_w(1.0000001), 0.0);
        assert!((heading_from_w(-1.5) - 2.0 * PI).abs() < 1e-12);

        for i in 0..=20 {
            let w = -1.0 + 0.1 * i as f64;
            let yaw = heading_from_w(w);
            assert!(yaw.is_finite());
            assert!((yaw - 2.0 * w.max(-1.0).min(1.0).acos()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_update() {
        let se = StateEstimator::new();

        let w = (PI / 4.0).cos();
        let state = se.update(&odom([1.0, 2.0, 0.0], w, [3.0, 0.5, 0.0], 0.2)).unwrap();

        assert_eq!(state.x, 1.0);
        assert_eq!(state.y, 2.0);
        assert!((state.yaw - PI / 2.0).abs() < 1e-12);
        assert_eq!(state.vel(), [3.0, 0.5, 0.2]);
    }

    #[test]
    fn test_invalid_odom() {
        let se = StateEstimator::new();

        assert_eq!(
            se.update(&odom([std::f64::NAN, 0.0, 0.0], 1.0, [0.0; 3], 0.0)),
            Err(StateEstError::NonFiniteInput)
        );

        let mut bad_w = odom([0.0; 3], 1.0, [0.0; 3], 0.0);
        bad_w.pose.orientation[3] = std::f64::INFINITY;
        assert!(matches!(
            se.update(&bad_w),
            Err(StateEstError::InvalidOrientation(_))
        ));
    }

    #[test]
    fn test_kinematic_slip() {
        assert_eq!(kinematic_slip(0.0, 0.15875, 0.17145), 0.0);

        let h = HeadingCommand::from_steer(0.4189, 0.15875, 0.17145);
        let expected = (0.17145 * 0.4189f64.tan() / (0.15875 + 0.17145)).atan();
        assert!((h.slip_angle - expected).abs() < 1e-12);
        assert!(h.slip_angle < h.steer);

        let neg = HeadingCommand::from_steer(-0.4189, 0.15875, 0.17145);
        assert!((neg.slip_angle + h.slip_angle).abs() < 1e-12);
    }
}
