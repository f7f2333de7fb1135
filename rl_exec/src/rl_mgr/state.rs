//! Implementations for the RlMgr state structure

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use std::{sync::Arc, time::Duration};

use chrono::Utc;
use comms_if::{ctrl::DriveCmd, eqpt::{LaserScan, Odometry}};
use log::{debug, info, warn};
use serde::Serialize;

// Internal
use super::{CycleMode, RlMgrError, RlOutput, StatusReport};
use crate::{
    fwd_sim::FwdSim,
    params::{FailurePolicy, OutputMode, RlParams},
    policy::{ObservationBundle, PolicyAdapter, PolicyBackend},
    rollout::{RolloutEngine, RolloutMgr, RolloutOutcome},
    scan_proc::{LatestScan, ScanBuffer, ScanPreprocessor},
    state_est::{HeadingCommand, StateEstimator},
    traj_fmt::TrajectoryFormatter,
    viz,
};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    module::State,
    session::{self, Session},
};

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Reference trajectory manager state
#[derive(Default)]
pub struct RlMgr {
    core: Option<Core>,

    report: StatusReport,
    report_archived: bool,
    arch_report: Archiver,

    unarchived: Vec<RlOutput>,
    arch_drive: Archiver,
    arch_ref_traj: Archiver,
}

/// Data required to initialise the manager.
pub struct InitData {
    pub params: RlParams,

    /// The policy model
    pub policy: Arc<dyn PolicyBackend>,

    /// Forward simulator, required in plan mode
    pub sim: Option<Box<dyn FwdSim>>,
}

struct Core {
    params: RlParams,
    state_est: StateEstimator,
    scan_proc: ScanPreprocessor,
    latest_scan: LatestScan,
    policy: PolicyAdapter,
    formatter: TrajectoryFormatter,
    mode: CycleMode,

    /// Heading issued on the previous cycle
    heading: HeadingCommand,

    /// Scan used by the latest planning cycle
    plan_scan: Arc<ScanBuffer>,

    /// Last successful trajectory, kept for republishing
    last_traj: Option<RlOutput>,

    num_cycles: u64,
}

#[derive(Serialize)]
struct DriveRecord {
    time_s: f64,
    steering_angle_rad: f64,
    speed_ms: f64,
}

#[derive(Serialize)]
struct RefTrajRecord {
    time_s: f64,
    cycle_id: u64,
    row: usize,
    x: f32,
    y: f32,
    delta: f32,
    vx: f32,
    yaw: f32,
    yaw_rate: f32,
    beta: f32,
}

#[derive(Serialize)]
struct ReportRecord {
    time_s: f64,
    cycle_id: u64,
    x: f64,
    y: f64,
    yaw: f64,
    vx: f64,
    vy: f64,
    yaw_rate: f64,
    steer: f64,
    speed: f64,
    heading_steer: f64,
    heading_slip: f64,
    rollout_requested: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl State for RlMgr {
    type InitData = InitData;
    type InitError = RlMgrError;

    type InputData = Odometry;
    type OutputData = Option<RlOutput>;
    type StatusReport = StatusReport;
    type ProcError = RlMgrError;

    /// Initialise the manager.
    ///
    /// In plan mode this starts the rollout worker, which takes ownership of the simulator.
    fn init(&mut self, init_data: InitData, session: Option<&Session>) -> Result<(), RlMgrError> {
        let InitData {
            params,
            policy,
            sim,
        } = init_data;

        params.validate()?;

        let policy = PolicyAdapter::new(policy, params.steer_max_rad, params.speed_max_ms);
        if policy.num_beams() != params.num_beams {
            return Err(RlMgrError::BeamCountMismatch {
                policy: policy.num_beams(),
                configured: params.num_beams,
            });
        }

        let formatter =
            TrajectoryFormatter::new(params.sim_time_step_s, params.rl_sim_time_step_s)?;

        let mode = match params.mode {
            OutputMode::Drive => CycleMode::Drive,
            OutputMode::Plan => {
                let sim = sim.ok_or(RlMgrError::NoSimulator)?;
                let engine = RolloutEngine::new(
                    sim,
                    policy.clone(),
                    params.lf_m,
                    params.lr_m,
                    params.horizon()?,
                );
                CycleMode::Plan(RolloutMgr::new(engine)?)
            }
        };

        // Initialise the archivers
        if let Some(session) = session {
            std::fs::create_dir_all(session.arch_root.join("rl_mgr"))
                .map_err(ArchiveError::FileCreateError)?;

            self.arch_report = Archiver::from_path(session, "rl_mgr/status_report.csv")?;
            self.arch_drive = Archiver::from_path(session, "rl_mgr/drive_cmd.csv")?;
            self.arch_ref_traj = Archiver::from_path(session, "rl_mgr/ref_traj.csv")?;
        }

        info!(
            "RlMgr initialised in {:?} mode, {} beams, resample ratio {}",
            mode,
            params.num_beams,
            formatter.ratio()
        );

        let latest_scan = LatestScan::new(ScanBuffer::uniform(
            params.num_beams,
            params.initial_scan_range_m,
        ));

        self.core = Some(Core {
            state_est: StateEstimator::new(),
            scan_proc: ScanPreprocessor::new(params.num_beams),
            plan_scan: latest_scan.snapshot(),
            latest_scan,
            policy,
            formatter,
            mode,
            heading: HeadingCommand::default(),
            last_traj: None,
            num_cycles: 0,
            params,
        });

        Ok(())
    }

    /// Run one cycle for a new odometry message.
    ///
    /// In drive mode the output is the drive command for this cycle. In plan mode a rollout is
    /// requested and the output is always `None`, the trajectory is collected later with
    /// `poll_output`.
    fn proc(
        &mut self,
        odom: &Odometry,
    ) -> Result<(Option<RlOutput>, StatusReport), RlMgrError> {
        let core = self.core.as_mut().ok_or(RlMgrError::NotInitialised)?;

        // Every cycle is numbered, including those which fail, and plan mode requests share the
        // same numbering
        core.num_cycles += 1;
        let cycle_id = core.num_cycles;

        let state = core.state_est.update(odom)?;
        let scan = core.latest_scan.snapshot();
        let obs = ObservationBundle::new(&scan, &state, &core.heading);

        let mut report = StatusReport {
            cycle_id,
            state,
            heading_in: core.heading,
            ..Default::default()
        };

        let action = match core.policy.infer(&obs) {
            Ok(a) => a,
            Err(e) => {
                session::save_with_timestamp("failed_obs/obs.json", obs);
                self.report = report;
                self.report_archived = false;

                return match core.mode {
                    CycleMode::Drive => Err(e.into()),
                    CycleMode::Plan(ref mut mgr) => {
                        warn!("Policy failed on the real state: {}", e);
                        mgr.supersede(cycle_id);

                        let output = core.failure_output();
                        if let Some(ref o) = output {
                            self.unarchived.push(o.clone());
                        }
                        Ok((output, report))
                    }
                };
            }
        };

        core.heading = HeadingCommand::from_steer(action.steer, core.params.lf_m, core.params.lr_m);
        report.action = action;

        let output = match core.mode {
            CycleMode::Drive => Some(RlOutput::Drive(DriveCmd {
                timestamp: Utc::now(),
                steering_angle_rad: action.steer,
                speed_ms: action.speed,
            })),
            CycleMode::Plan(ref mut mgr) => {
                mgr.request(cycle_id, state, action)?;
                core.plan_scan = scan;
                report.rollout_requested = true;
                None
            }
        };

        if let Some(ref o) = output {
            self.unarchived.push(o.clone());
        }
        self.report = report;
        self.report_archived = false;

        Ok((output, report))
    }
}

impl Archived for RlMgr {
    fn write(&mut self) -> Result<(), ArchiveError> {
        let time_s = session::get_elapsed_seconds();

        if !self.report_archived {
            let r = &self.report;
            self.arch_report.serialise(ReportRecord {
                time_s,
                cycle_id: r.cycle_id,
                x: r.state.x,
                y: r.state.y,
                yaw: r.state.yaw,
                vx: r.state.vx,
                vy: r.state.vy,
                yaw_rate: r.state.yaw_rate,
                steer: r.action.steer,
                speed: r.action.speed,
                heading_steer: r.heading_in.steer,
                heading_slip: r.heading_in.slip_angle,
                rollout_requested: r.rollout_requested,
            })?;
            self.report_archived = true;
        }

        for output in self.unarchived.drain(..) {
            match output {
                RlOutput::Drive(cmd) => self.arch_drive.serialise(DriveRecord {
                    time_s,
                    steering_angle_rad: cmd.steering_angle_rad,
                    speed_ms: cmd.speed_ms,
                })?,
                RlOutput::RefTraj { cycle_id, traj, .. } => {
                    for row in 0..traj.num_rows() {
                        if let Some(r) = traj.row(row) {
                            self.arch_ref_traj.serialise(RefTrajRecord {
                                time_s,
                                cycle_id,
                                row,
                                x: r[0],
                                y: r[1],
                                delta: r[2],
                                vx: r[3],
                                yaw: r[4],
                                yaw_rate: r[5],
                                beta: r[6],
                            })?;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

impl RlMgr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a newly arrived scan, making it the scan used by the next cycle.
    pub fn handle_scan(&mut self, scan: &LaserScan) -> Result<(), RlMgrError> {
        let core = self.core.as_ref().ok_or(RlMgrError::NotInitialised)?;

        let buf = core.scan_proc.process(scan)?;
        core.latest_scan.publish(buf);

        Ok(())
    }

    /// Collect the trajectory of the latest cycle if it is ready.
    pub fn poll_output(&mut self) -> Result<Option<RlOutput>, RlMgrError> {
        let core = self.core.as_mut().ok_or(RlMgrError::NotInitialised)?;

        let outcome = match core.mode {
            CycleMode::Drive => return Ok(None),
            CycleMode::Plan(ref mut mgr) => mgr.poll()?,
        };

        let output = core.handle_outcome(outcome)?;
        if let Some(ref o) = output {
            self.unarchived.push(o.clone());
        }

        Ok(output)
    }

    /// Wait up to `timeout` for the trajectory of the latest cycle.
    pub fn wait_output(&mut self, timeout: Duration) -> Result<Option<RlOutput>, RlMgrError> {
        let core = self.core.as_mut().ok_or(RlMgrError::NotInitialised)?;

        let outcome = match core.mode {
            CycleMode::Drive => return Ok(None),
            CycleMode::Plan(ref mut mgr) => mgr.wait(timeout)?,
        };

        let output = core.handle_outcome(outcome)?;
        if let Some(ref o) = output {
            self.unarchived.push(o.clone());
        }

        Ok(output)
    }

    /// Number of cycles run so far.
    pub fn num_cycles(&self) -> u64 {
        self.core.as_ref().map_or(0, |c| c.num_cycles)
    }

    /// Stop the rollout worker, if there is one.
    pub fn stop(&mut self) -> Result<(), RlMgrError> {
        if let Some(core) = self.core.take() {
            if let CycleMode::Plan(mgr) = core.mode {
                mgr.stop()?;
            }
        }

        Ok(())
    }
}

impl Core {
    fn handle_outcome(
        &mut self,
        outcome: Option<RolloutOutcome>,
    ) -> Result<Option<RlOutput>, RlMgrError> {
        match outcome {
            None => Ok(None),
            Some(RolloutOutcome::Complete(res)) => {
                let states = self.formatter.format(&res.steps)?;
                let traj = self.formatter.to_ref_traj(Utc::now(), &states);

                // Markers are only drawn for the predicted poses, not the current one
                let markers = viz::pose_markers(
                    res.steps.get(1..).unwrap_or(&[]),
                    &self.params.marker_frame_id,
                );

                debug!(
                    "Cycle {} trajectory ready, {} rows",
                    res.id,
                    traj.num_rows()
                );

                // The scan the cycle started from, seen from the real state
                let scan_points = match res.steps.first() {
                    Some(s) => self.plan_scan.world_points(s.state.pose()),
                    None => vec![],
                };

                let output = RlOutput::RefTraj {
                    cycle_id: res.id,
                    traj,
                    markers,
                    scan_points,
                };
                self.last_traj = Some(output.clone());

                Ok(Some(output))
            }
            Some(RolloutOutcome::Failed(id, e)) => {
                warn!("Rollout for cycle {} failed: {}", id, e);
                Ok(self.failure_output())
            }
        }
    }

    /// Output for a failed planning cycle.
    fn failure_output(&self) -> Option<RlOutput> {
        match self.params.on_rollout_failure {
            FailurePolicy::Suppress => None,
            FailurePolicy::RepublishLast => {
                let mut output = self.last_traj.clone()?;
                if let RlOutput::RefTraj { ref mut traj, .. } = output {
                    traj.timestamp = Utc::now();
                }
                info!("Republishing the last trajectory");
                Some(output)
            }
        }
    }
}
