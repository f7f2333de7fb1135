//! # Data Store

use comms_if::ctrl::{DriveCmd, PoseMarkerArray, RefTraj};
use log::trace;
use nalgebra::Point2;

use crate::rl_mgr::{self, RlMgr, RlOutput};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Global data store for the executable.
#[derive(Default)]
pub struct DataStore {
    // Cycle management
    /// Number of cycles already executed
    pub num_cycles: u128,

    /// True if this cycle falls on a 1Hz boundary
    pub is_1_hz_cycle: bool,

    /// Session time at the start of the cycle
    pub sim_time_s: f64,

    // RlMgr
    pub rl_mgr: RlMgr,
    pub rl_mgr_status_rpt: Option<rl_mgr::StatusReport>,

    // Outputs produced this cycle
    pub drive_cmd: Option<DriveCmd>,
    pub ref_traj: Option<RefTraj>,
    pub pose_markers: Option<PoseMarkerArray>,
    pub scan_points: Option<Vec<Point2<f64>>>,

    // Monitoring Counters
    /// Number of odometry messages received
    pub num_odom_msgs: u64,

    /// Number of scan messages received
    pub num_scan_msgs: u64,

    /// Number of consecutive cycle overruns
    pub num_consec_cycle_overruns: u64,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl DataStore {
    /// Perform actions required at the start of a cycle.
    ///
    /// Clears those items that need clearing at the start of a cycle, and sets the 1Hz cycle flag.
    pub fn cycle_start(&mut self, cycle_frequency_hz: f64) {
        let cycles_per_s = (cycle_frequency_hz.round() as u128).max(1);
        self.is_1_hz_cycle = self.num_cycles % cycles_per_s == 0;

        self.rl_mgr_status_rpt = None;
        self.drive_cmd = None;
        self.ref_traj = None;
        self.pose_markers = None;
        self.scan_points = None;

        self.sim_time_s = util::session::get_elapsed_seconds();
    }

    /// Store an output from the manager ready for publishing.
    pub fn set_output(&mut self, output: RlOutput) {
        match output {
            RlOutput::Drive(cmd) => {
                trace!("Drive command: {:?}", cmd);
                self.drive_cmd = Some(cmd);
            }
            RlOutput::RefTraj {
                traj,
                markers,
                scan_points,
                ..
            } => {
                trace!("Reference trajectory with {} rows", traj.num_rows());
                self.ref_traj = Some(traj);
                self.pose_markers = Some(markers);
                self.scan_points = Some(scan_points);
            }
        }
    }
}
