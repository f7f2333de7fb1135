//! # Reference Trajectory
//!
//! The reference trajectory is sent to the outer MPPI controller as a flat, row-major array of
//! single precision floats. Each row is one state:
//!
//! | column | quantity | units |
//! |--------|----------|-------|
//! | 0      | x        | m     |
//! | 1      | y        | m     |
//! | 2      | steering angle (delta) | rad |
//! | 3      | longitudinal velocity  | m/s |
//! | 4      | yaw, wrapped into (-pi, pi] | rad |
//! | 5      | yaw rate | rad/s |
//! | 6      | slip angle (beta) | rad |

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of columns in each row of the trajectory.
pub const REF_TRAJ_STATE_DIM: usize = 7;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A flattened reference trajectory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefTraj {
    /// UTC time at which the trajectory was generated
    pub timestamp: DateTime<Utc>,

    /// Layout of the data, `[rows, REF_TRAJ_STATE_DIM]`
    pub dims: [usize; 2],

    /// Row-major state data
    pub data: Vec<f32>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum RefTrajError {
    #[error("Expected rows of length {expected} but found a row of length {found}")]
    WrongRowLength { expected: usize, found: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RefTraj {
    /// Build a new trajectory from a set of rows.
    pub fn from_rows(
        timestamp: DateTime<Utc>,
        rows: &[[f32; REF_TRAJ_STATE_DIM]],
    ) -> Self {
        Self {
            timestamp,
            dims: [rows.len(), REF_TRAJ_STATE_DIM],
            data: rows.iter().flat_map(|r| r.iter().copied()).collect(),
        }
    }

    /// Number of states in the trajectory.
    pub fn num_rows(&self) -> usize {
        self.dims[0]
    }

    /// Get a single row of the trajectory.
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        if index >= self.dims[0] {
            return None;
        }

        let start = index * self.dims[1];
        self.data.get(start..start + self.dims[1])
    }

    /// Check that the data length agrees with the declared layout.
    pub fn validate(&self) -> Result<(), RefTrajError> {
        if self.dims[1] != REF_TRAJ_STATE_DIM {
            return Err(RefTrajError::WrongRowLength {
                expected: REF_TRAJ_STATE_DIM,
                found: self.dims[1],
            });
        }

        if self.data.len() != self.dims[0] * self.dims[1] {
            return Err(RefTrajError::WrongRowLength {
                expected: REF_TRAJ_STATE_DIM,
                found: self.data.len() % REF_TRAJ_STATE_DIM,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_rows() {
        let rows = [
            [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            [10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0],
        ];
        let traj = RefTraj::from_rows(Utc::now(), &rows);

        assert_eq!(traj.dims, [2, 7]);
        assert_eq!(traj.data.len(), 14);
        assert_eq!(traj.row(1).unwrap()[0], 10.0);
        assert!(traj.row(2).is_none());
        assert!(traj.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_layout() {
        let mut traj = RefTraj::from_rows(Utc::now(), &[[0.0; 7]]);
        traj.data.push(1.0);

        assert!(traj.validate().is_err());
    }
}
