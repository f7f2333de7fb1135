//! # Scan Preprocessing
//!
//! Full resolution laser scans are clipped to the sensor's valid range and downsampled to the fixed
//! number of beams the policy was trained with. The latest processed scan is shared with the cycle
//! through a `LatestScan` handle, so that scan arrival never blocks on a cycle in progress.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, RwLock};

use comms_if::eqpt::LaserScan;
use log::warn;
use nalgebra::{Point2, Rotation2, Vector2};
use serde::Serialize;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A downsampled scan with a fixed number of beams, all within the sensor's range limits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanBuffer {
    ranges: Vec<f32>,

    /// Sensor frame angle of each beam, empty if the buffer did not come from a scan
    angles: Vec<f64>,
}

/// Downsamples scans to a fixed beam count.
#[derive(Debug, Clone, Copy)]
pub struct ScanPreprocessor {
    num_beams: usize,
}

/// Shared handle to the most recent processed scan.
///
/// Writers swap in a new buffer and readers clone the pointer, the lock is never held for longer
/// than either of those operations.
#[derive(Debug, Clone)]
pub struct LatestScan {
    inner: Arc<RwLock<Arc<ScanBuffer>>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum ScanProcError {
    #[error("Scan has {found} readings, which is fewer than the {expected} beams required")]
    ScanLengthMismatch { expected: usize, found: usize },

    #[error("Scan range limits are invalid (min = {0}, max = {1})")]
    InvalidRangeLimits(f64, f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ScanBuffer {
    /// Create a buffer with every beam set to the same range.
    pub fn uniform(num_beams: usize, range_m: f32) -> Self {
        Self {
            ranges: vec![range_m; num_beams],
            angles: vec![],
        }
    }

    pub fn ranges(&self) -> &[f32] {
        &self.ranges
    }

    pub fn angles(&self) -> &[f64] {
        &self.angles
    }

    /// World frame points of the beams seen from the sensor pose `[x, y, yaw]`.
    ///
    /// Empty if the beam angles are unknown.
    pub fn world_points(&self, pose: [f64; 3]) -> Vec<Point2<f64>> {
        scan_to_world(&self.ranges, self.angles(), pose)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl ScanPreprocessor {
    pub fn new(num_beams: usize) -> Self {
        Self { num_beams }
    }

    pub fn num_beams(&self) -> usize {
        self.num_beams
    }

    /// Process a laser scan message.
    pub fn process(&self, scan: &LaserScan) -> Result<ScanBuffer, ScanProcError> {
        let mut buf = self.process_ranges(&scan.ranges, scan.range_min, scan.range_max)?;

        let stride = scan.ranges.len() / self.num_beams;
        buf.angles = (0..buf.len())
            .map(|i| scan.angle_min + (i * stride) as f64 * scan.angle_increment)
            .collect();

        Ok(buf)
    }

    /// Clip the readings to `[range_min, range_max]` and pick every `k`th reading, where
    /// `k = floor(len / num_beams)`, keeping the first `num_beams` picked.
    ///
    /// NaN readings are treated as no return and set to `range_max`.
    pub fn process_ranges(
        &self,
        ranges: &[f32],
        range_min: f64,
        range_max: f64,
    ) -> Result<ScanBuffer, ScanProcError> {
        if !(range_min.is_finite() && range_max.is_finite()) || range_min > range_max {
            return Err(ScanProcError::InvalidRangeLimits(range_min, range_max));
        }

        let stride = ranges.len() / self.num_beams;
        if stride == 0 {
            return Err(ScanProcError::ScanLengthMismatch {
                expected: self.num_beams,
                found: ranges.len(),
            });
        }

        let (min, max) = (range_min as f32, range_max as f32);

        let ranges = ranges
            .iter()
            .step_by(stride)
            .take(self.num_beams)
            .map(|&r| if r.is_nan() { max } else { r.max(min).min(max) })
            .collect();

        Ok(ScanBuffer {
            ranges,
            angles: vec![],
        })
    }
}

impl LatestScan {
    /// Create a new handle holding `initial`.
    pub fn new(initial: ScanBuffer) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Publish a new scan.
    pub fn publish(&self, scan: ScanBuffer) {
        let new = Arc::new(scan);
        match self.inner.write() {
            Ok(mut guard) => *guard = new,
            // Only a pointer swap happens under the lock so a poisoned value is still whole
            Err(poisoned) => {
                warn!("Latest scan lock poisoned, recovering");
                *poisoned.into_inner() = new
            }
        }
    }

    /// Get the latest scan.
    pub fn snapshot(&self) -> Arc<ScanBuffer> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Convert scan readings at the given beam angles into world frame points, given the sensor pose
/// `[x, y, yaw]`.
pub fn scan_to_world(ranges: &[f32], angles: &[f64], pose: [f64; 3]) -> Vec<Point2<f64>> {
    let rot = Rotation2::new(pose[2]);
    let trans = Vector2::new(pose[0], pose[1]);

    ranges
        .iter()
        .zip(angles.iter())
        .map(|(&r, &a)| {
            let body = Point2::new(r as f64 * a.cos(), r as f64 * a.sin());
            rot * body + trans
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn scan(ranges: Vec<f32>) -> LaserScan {
        LaserScan {
            stamp_s: 0.0,
            angle_min: -1.0,
            angle_max: 1.0,
            angle_increment: 2.0 / ranges.len() as f64,
            range_min: 0.5,
            range_max: 30.0,
            ranges,
        }
    }

    #[test]
    fn test_downsample() {
        let sp = ScanPreprocessor::new(4);
        let ranges: Vec<f32> = (0..16).map(|i| i as f32 + 1.0).collect();

        let buf = sp.process(&scan(ranges)).unwrap();
        assert_eq!(buf.ranges(), &[1.0, 5.0, 9.0, 13.0]);

        // Angles of the picked readings, 4 raw readings apart at 0.125 rad each
        for (a, e) in buf.angles().iter().zip([-1.0, -0.5, 0.0, 0.5].iter()) {
            assert!((a - e).abs() < 1e-9);
        }
        assert_eq!(buf.angles().len(), 4);

        // Original scanner resolution (1080) to a 54 beam policy
        let sp = ScanPreprocessor::new(54);
        for len in &[54usize, 108, 540, 1080] {
            let buf = sp.process(&scan(vec![5.0; *len])).unwrap();
            assert_eq!(buf.len(), 54);
        }

        // Non-multiple lengths still give the right number of beams
        let buf = sp.process(&scan(vec![5.0; 1081])).unwrap();
        assert_eq!(buf.len(), 54);
    }

    #[test]
    fn test_clip() {
        let sp = ScanPreprocessor::new(4);
        let buf = sp
            .process(&scan(vec![
                0.1,
                100.0,
                std::f32::NAN,
                std::f32::INFINITY,
            ]))
            .unwrap();

        assert_eq!(buf.ranges(), &[0.5, 30.0, 30.0, 30.0]);
    }

    #[test]
    fn test_too_short() {
        let sp = ScanPreprocessor::new(4);
        assert_eq!(
            sp.process(&scan(vec![1.0; 3])),
            Err(ScanProcError::ScanLengthMismatch {
                expected: 4,
                found: 3
            })
        );
        assert_eq!(
            sp.process_ranges(&[1.0; 4], 5.0, 1.0),
            Err(ScanProcError::InvalidRangeLimits(5.0, 1.0))
        );
    }

    #[test]
    fn test_latest_scan() {
        let latest = LatestScan::new(ScanBuffer::uniform(3, 10.0));
        let before = latest.snapshot();

        latest.publish(ScanBuffer::uniform(3, 2.0));

        // Snapshots taken earlier are unaffected by later publishes
        assert_eq!(before.ranges(), &[10.0; 3]);
        assert_eq!(latest.snapshot().ranges(), &[2.0; 3]);
    }

    #[test]
    fn test_scan_to_world() {
        let points = scan_to_world(&[1.0, 2.0], &[0.0, FRAC_PI_2], [1.0, 1.0, FRAC_PI_2]);

        assert!((points[0] - Point2::new(1.0, 2.0)).norm() < 1e-9);
        assert!((points[1] - Point2::new(-1.0, 1.0)).norm() < 1e-9);

        // Processed scans carry their beam angles, the initial buffer has none
        let buf = ScanPreprocessor::new(2)
            .process(&LaserScan {
                stamp_s: 0.0,
                angle_min: 0.0,
                angle_max: FRAC_PI_2,
                angle_increment: FRAC_PI_2,
                range_min: 0.0,
                range_max: 30.0,
                ranges: vec![1.0, 2.0],
            })
            .unwrap();
        assert_eq!(buf.world_points([1.0, 1.0, FRAC_PI_2]), points);
        assert!(ScanBuffer::uniform(2, 10.0)
            .world_points([0.0; 3])
            .is_empty());
    }
}
