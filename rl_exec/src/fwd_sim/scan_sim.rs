//! Ray cast range scan simulation against wall segments

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::LaserScan;
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use super::FwdSimError;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the simulated range sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSimParams {
    /// Number of readings in a full resolution scan
    pub num_readings: usize,

    /// Units: radians
    pub angle_min_rad: f64,

    /// Units: radians
    pub angle_max_rad: f64,

    /// Units: meters
    pub range_min_m: f64,

    /// Units: meters
    pub range_max_m: f64,
}

#[derive(Debug, Clone)]
struct Segment {
    start: Point2<f64>,
    dir: Vector2<f64>,
}

/// Simulates a planar scanner mounted at the vehicle's reference point.
#[derive(Debug, Clone)]
pub struct ScanSim {
    params: ScanSimParams,
    segments: Vec<Segment>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ScanSim {
    pub fn new(params: ScanSimParams, walls: &[[f64; 4]]) -> Result<Self, FwdSimError> {
        if params.num_readings < 2 {
            return Err(FwdSimError::InvalidParams(
                "scan must have at least 2 readings".into(),
            ));
        }
        if params.angle_max_rad <= params.angle_min_rad
            || params.range_max_m <= params.range_min_m
            || params.range_min_m < 0.0
        {
            return Err(FwdSimError::InvalidParams(
                "scan angle and range limits must be increasing".into(),
            ));
        }

        let segments = walls
            .iter()
            .map(|w| Segment {
                start: Point2::new(w[0], w[1]),
                dir: Vector2::new(w[2] - w[0], w[3] - w[1]),
            })
            .collect();

        Ok(Self { params, segments })
    }

    pub fn angle_increment(&self) -> f64 {
        (self.params.angle_max_rad - self.params.angle_min_rad)
            / (self.params.num_readings - 1) as f64
    }

    /// Cast every beam from `pose`.
    pub fn scan(&self, pose: [f64; 3], stamp_s: f64) -> LaserScan {
        let origin = Point2::new(pose[0], pose[1]);
        let inc = self.angle_increment();

        let ranges = (0..self.params.num_readings)
            .map(|i| {
                let theta = pose[2] + self.params.angle_min_rad + i as f64 * inc;
                let range = self.cast(&origin, &Vector2::new(theta.cos(), theta.sin()));
                range.max(self.params.range_min_m).min(self.params.range_max_m) as f32
            })
            .collect();

        LaserScan {
            stamp_s,
            angle_min: self.params.angle_min_rad,
            angle_max: self.params.angle_max_rad,
            angle_increment: inc,
            range_min: self.params.range_min_m,
            range_max: self.params.range_max_m,
            ranges,
        }
    }

    /// Distance along the ray to the nearest wall, or `range_max` if none is hit.
    fn cast(&self, origin: &Point2<f64>, ray: &Vector2<f64>) -> f64 {
        let mut nearest = self.params.range_max_m;

        for seg in self.segments.iter() {
            let denom = cross(ray, &seg.dir);
            if denom.abs() < 1e-12 {
                continue;
            }

            let to_start = seg.start - *origin;
            let t = cross(&to_start, &seg.dir) / denom;
            let s = cross(&to_start, ray) / denom;

            if t >= 0.0 && (0.0..=1.0).contains(&s) && t < nearest {
                nearest = t;
            }
        }

        nearest
    }
}

fn cross(a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    a.x * b.y - a.y * b.x
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn params() -> ScanSimParams {
        ScanSimParams {
            num_readings: 3,
            angle_min_rad: -FRAC_PI_2,
            angle_max_rad: FRAC_PI_2,
            range_min_m: 0.1,
            range_max_m: 30.0,
        }
    }

    #[test]
    fn test_corridor() {
        // Corridor along X, 1 m to the left and 2 m to the right
        let sim = ScanSim::new(
            params(),
            &[[-10.0, 1.0, 10.0, 1.0], [-10.0, -2.0, 10.0, -2.0]],
        )
        .unwrap();

        let scan = sim.scan([0.0, 0.0, 0.0], 0.0);
        assert_eq!(scan.ranges.len(), 3);
        assert!((scan.ranges[0] - 2.0).abs() < 1e-5);
        assert_eq!(scan.ranges[1], 30.0);
        assert!((scan.ranges[2] - 1.0).abs() < 1e-5);
        assert!((scan.angle_increment - FRAC_PI_2).abs() < 1e-12);

        // Facing the other way swaps the sides
        let scan = sim.scan([0.0, 0.0, std::f64::consts::PI], 0.0);
        assert!((scan.ranges[0] - 1.0).abs() < 1e-5);
        assert!((scan.ranges[2] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_wall_ahead() {
        let sim = ScanSim::new(params(), &[[5.0, -1.0, 5.0, 1.0], [0.05, -1.0, 0.05, 1.0]]).unwrap();

        // Wall behind the sensor is not seen, wall inside min range is clamped
        let scan = sim.scan([1.0, 0.0, 0.0], 0.0);
        assert!((scan.ranges[1] - 4.0).abs() < 1e-5);

        let scan = sim.scan([0.0, 0.0, 0.0], 0.0);
        assert!((scan.ranges[1] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_params() {
        let mut p = params();
        p.num_readings = 1;
        assert!(ScanSim::new(p, &[]).is_err());

        let mut p = params();
        p.range_max_m = 0.0;
        assert!(ScanSim::new(p, &[]).is_err());
    }
}
