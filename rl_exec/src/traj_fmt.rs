//! # Trajectory Formatting
//!
//! Rollout states are converted into the state convention of the trajectory-optimising controller
//! and resampled from the simulation timestep to the controller's timestep.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::ctrl::{RefTraj, REF_TRAJ_STATE_DIM};
use serde::Serialize;
use thiserror::Error;
use util::maths::wrap_to_pi;

use crate::{params::ParamsError, rollout::RolloutStep};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single state of the output trajectory.
///
/// Field order matches the row layout of the published trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MppiState {
    pub x: f64,
    pub y: f64,

    /// Steering angle
    pub delta: f64,

    pub vx: f64,

    /// Heading wrapped into `(-pi, pi]`
    pub yaw: f64,

    pub yaw_rate: f64,

    /// Slip angle of the velocity vector, `atan2(vy, vx)`
    pub beta: f64,
}

/// Formats rollouts into reference trajectories.
#[derive(Debug, Clone, Copy)]
pub struct TrajectoryFormatter {
    ratio: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum TrajFmtError {
    #[error("Invalid resample ratio: {0}")]
    InvalidRatio(ParamsError),

    #[error("The resample ratio must be at least 1")]
    ZeroRatio,

    #[error("Cannot resample an empty trajectory")]
    EmptyTrajectory,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MppiState {
    /// Convert a rollout step, pairing the state with the steer commanded from it.
    pub fn from_step(step: &RolloutStep) -> Self {
        let s = &step.state;

        Self {
            x: s.x,
            y: s.y,
            delta: step.steer,
            vx: s.vx,
            yaw: wrap_to_pi(s.yaw),
            yaw_rate: s.yaw_rate,
            beta: s.vy.atan2(s.vx),
        }
    }

    pub fn as_row(&self) -> [f32; REF_TRAJ_STATE_DIM] {
        [
            self.x as f32,
            self.y as f32,
            self.delta as f32,
            self.vx as f32,
            self.yaw as f32,
            self.yaw_rate as f32,
            self.beta as f32,
        ]
    }
}

impl TrajectoryFormatter {
    /// Create a formatter from the controller (`outer_dt_s`) and simulation (`inner_dt_s`)
    /// timesteps, which must have an integer ratio.
    pub fn new(outer_dt_s: f64, inner_dt_s: f64) -> Result<Self, TrajFmtError> {
        let ratio = crate::params::resample_ratio(outer_dt_s, inner_dt_s)
            .map_err(TrajFmtError::InvalidRatio)?;

        Ok(Self { ratio })
    }

    pub fn ratio(&self) -> usize {
        self.ratio
    }

    /// Format and resample a rollout.
    pub fn format(&self, steps: &[RolloutStep]) -> Result<Vec<MppiState>, TrajFmtError> {
        let states: Vec<MppiState> = steps.iter().map(MppiState::from_step).collect();

        resample(&states, self.ratio)
    }

    /// Build the reference trajectory message.
    pub fn to_ref_traj(&self, timestamp: DateTime<Utc>, states: &[MppiState]) -> RefTraj {
        let rows: Vec<[f32; REF_TRAJ_STATE_DIM]> = states.iter().map(|s| s.as_row()).collect();

        RefTraj::from_rows(timestamp, &rows)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Keep every `ratio`th element starting from the first.
///
/// For `N + 1` inputs this gives indices `0, k, 2k, ...` up to `N`, i.e. `floor(N / k) + 1`
/// elements.
pub fn resample<T: Clone>(traj: &[T], ratio: usize) -> Result<Vec<T>, TrajFmtError> {
    if ratio == 0 {
        return Err(TrajFmtError::ZeroRatio);
    }
    if traj.is_empty() {
        return Err(TrajFmtError::EmptyTrajectory);
    }

    Ok(traj.iter().step_by(ratio).cloned().collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::state_est::VehicleState;
    use std::f64::consts::PI;

    fn step(i: usize) -> RolloutStep {
        RolloutStep {
            state: VehicleState {
                x: i as f64,
                ..Default::default()
            },
            steer: 0.0,
        }
    }

    #[test]
    fn test_resample_length() {
        let steps: Vec<RolloutStep> = (0..=8).map(step).collect();
        let fmt = TrajectoryFormatter { ratio: 4 };

        let out = fmt.format(&steps).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(
            out.iter().map(|s| s.x).collect::<Vec<_>>(),
            vec![0.0, 4.0, 8.0]
        );

        // floor(N/k) + 1 for all N and k
        for n in 0..20usize {
            for k in 1..6usize {
                let traj: Vec<usize> = (0..=n).collect();
                let out = resample(&traj, k).unwrap();
                assert_eq!(out.len(), n / k + 1);
                assert!(out.iter().all(|i| i % k == 0));
            }
        }

        assert_eq!(resample(&[1, 2, 3], 0), Err(TrajFmtError::ZeroRatio));
        assert_eq!(resample::<u8>(&[], 2), Err(TrajFmtError::EmptyTrajectory));
    }

    #[test]
    fn test_horizon_gives_n_steps_plus_one() {
        let fmt = TrajectoryFormatter::new(0.1, 0.025).unwrap();
        assert_eq!(fmt.ratio(), 4);

        let n_steps = 8;
        let steps: Vec<RolloutStep> = (0..=n_steps * fmt.ratio()).map(step).collect();
        assert_eq!(fmt.format(&steps).unwrap().len(), n_steps + 1);

        assert!(matches!(
            TrajectoryFormatter::new(0.1, 0.03),
            Err(TrajFmtError::InvalidRatio(_))
        ));
    }

    #[test]
    fn test_mppi_state() {
        let s = MppiState::from_step(&RolloutStep {
            state: VehicleState {
                x: 1.0,
                y: 2.0,
                yaw: 3.0 * PI / 2.0,
                yaw_rate: 0.5,
                vx: 1.0,
                vy: 1.0,
            },
            steer: 0.2,
        });

        assert_eq!(s.delta, 0.2);
        assert!((s.yaw + PI / 2.0).abs() < 1e-12);
        assert!((s.beta - PI / 4.0).abs() < 1e-12);

        let row = s.as_row();
        assert_eq!(row[0], 1.0);
        assert_eq!(row[2], 0.2);
        assert_eq!(row[5], 0.5);

        let traj = TrajectoryFormatter { ratio: 1 }.to_ref_traj(Utc::now(), &[s, s]);
        assert_eq!(traj.dims, [2, 7]);
        assert!(traj.validate().is_ok());
    }

    #[test]
    fn test_yaw_range() {
        for i in -50..50 {
            let mut st = step(0);
            st.state.yaw = i as f64 * 0.3;
            let yaw = MppiState::from_step(&st).yaw;
            assert!(yaw > -PI && yaw <= PI);
        }
    }
}
