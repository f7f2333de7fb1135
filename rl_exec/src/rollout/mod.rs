//! # Forward Rollout
//!
//! The rollout engine predicts the trajectory the policy will drive over the horizon. Starting from
//! the current state it alternates stepping the forward simulator with the last action and running
//! the policy on the simulated observation.
//!
//! Rollouts are run on a worker thread owned by a `RolloutMgr` so that the cycle is never blocked.
//! Each request carries a `CancelToken`, and a newer request cancels any older one still running.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod worker;

pub use worker::{RolloutMgr, RolloutOutcome, RolloutResult};

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use log::trace;
use serde::Serialize;
use thiserror::Error;

use crate::{
    fwd_sim::{FwdSim, FwdSimError},
    policy::{ControlAction, ObservationBundle, PolicyAdapter, PolicyError},
    scan_proc::{ScanPreprocessor, ScanProcError},
    state_est::{HeadingCommand, VehicleState},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One recorded step of a rollout, the state paired with the steer commanded from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RolloutStep {
    pub state: VehicleState,

    /// Units: radians
    pub steer: f64,
}

/// Issues monotonically increasing cycle IDs.
#[derive(Debug, Clone, Default)]
pub struct CycleIds {
    latest: Arc<AtomicU64>,
}

/// Identifies one cycle's request, cancelled once a newer ID has been issued.
#[derive(Debug, Clone)]
pub struct CancelToken {
    latest: Arc<AtomicU64>,
    id: u64,
}

/// Runs rollouts of the policy through the forward simulator.
pub struct RolloutEngine {
    sim: Box<dyn FwdSim>,
    policy: PolicyAdapter,
    scan_proc: ScanPreprocessor,
    lf_m: f64,
    lr_m: f64,
    horizon: usize,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("Rollout for cycle {0} was superseded by a newer cycle")]
    Cancelled(u64),

    #[error("Forward simulator error: {0}")]
    SimError(FwdSimError),

    #[error("Policy error: {0}")]
    PolicyError(PolicyError),

    #[error("Simulated scan error: {0}")]
    ScanError(ScanProcError),

    #[error("Could not start the rollout worker thread: {0}")]
    SpawnFailed(std::io::Error),

    #[error("The rollout worker is no longer running")]
    WorkerDisconnected,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CycleIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next ID, cancelling all earlier tokens.
    pub fn next(&self) -> CancelToken {
        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        CancelToken {
            latest: self.latest.clone(),
            id,
        }
    }

    /// Issue a token for the given ID, cancelling all tokens with lower IDs.
    ///
    /// IDs never go backwards, a token issued below the latest ID is already cancelled.
    pub fn issue(&self, id: u64) -> CancelToken {
        self.latest.fetch_max(id, Ordering::SeqCst);

        CancelToken {
            latest: self.latest.clone(),
            id,
        }
    }

    /// The most recently issued ID, 0 if none have been issued.
    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }
}

impl CancelToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.latest.load(Ordering::SeqCst) != self.id
    }

    fn check(&self) -> Result<(), RolloutError> {
        if self.is_cancelled() {
            Err(RolloutError::Cancelled(self.id))
        } else {
            Ok(())
        }
    }
}

impl RolloutEngine {
    /// Create a new engine running `horizon` simulation steps per rollout.
    pub fn new(
        sim: Box<dyn FwdSim>,
        policy: PolicyAdapter,
        lf_m: f64,
        lr_m: f64,
        horizon: usize,
    ) -> Self {
        let scan_proc = ScanPreprocessor::new(policy.num_beams());

        Self {
            sim,
            policy,
            scan_proc,
            lf_m,
            lr_m,
            horizon,
        }
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Roll the policy forward from `state`.
    ///
    /// `first_action` is the policy's action for the real state, which the caller has already
    /// computed. The returned trajectory always has `horizon + 1` steps, the first being `state`
    /// itself. Any failure aborts the whole rollout.
    pub fn rollout(
        &mut self,
        state: &VehicleState,
        first_action: &ControlAction,
        cancel: &CancelToken,
    ) -> Result<Vec<RolloutStep>, RolloutError> {
        let mut steps = Vec::with_capacity(self.horizon + 1);
        steps.push(RolloutStep {
            state: *state,
            steer: first_action.steer,
        });

        cancel.check()?;
        self.sim.reset(state.pose())?;

        let mut action = *first_action;

        for i in 1..=self.horizon {
            cancel.check()?;

            let obs = self.sim.step(&action)?;
            let scan = self.scan_proc.process(&obs.scan)?;

            // The policy sees the steer just applied, with its kinematic slip
            let heading = HeadingCommand::from_steer(action.steer, self.lf_m, self.lr_m);

            action = self
                .policy
                .infer(&ObservationBundle::new(&scan, &obs.state, &heading))?;

            trace!("Rollout step {}: {:?} -> {:?}", i, obs.state, action);

            steps.push(RolloutStep {
                state: obs.state,
                steer: action.steer,
            });
        }

        Ok(steps)
    }
}

impl From<FwdSimError> for RolloutError {
    fn from(e: FwdSimError) -> Self {
        Self::SimError(e)
    }
}

impl From<PolicyError> for RolloutError {
    fn from(e: PolicyError) -> Self {
        Self::PolicyError(e)
    }
}

impl From<ScanProcError> for RolloutError {
    fn from(e: ScanProcError) -> Self {
        Self::ScanError(e)
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::{
        fwd_sim::SimObservation,
        policy::{
            test::{ConstPolicy, SeqPolicy},
            PolicyBackend,
        },
        scan_proc::ScanBuffer,
        state_est::kinematic_slip,
    };
    use comms_if::eqpt::LaserScan;
    use std::sync::atomic::AtomicUsize;

    /// Simulator which moves along X at the commanded speed and counts its calls.
    pub(crate) struct CountingSim {
        pub num_readings: usize,
        pub dt_s: f64,
        pub resets: Arc<AtomicUsize>,
        pub steps: Arc<AtomicUsize>,
        pub fail_at_step: Option<usize>,
        state: VehicleState,
    }

    impl CountingSim {
        pub(crate) fn new(num_readings: usize) -> Self {
            Self {
                num_readings,
                dt_s: 0.1,
                resets: Arc::new(AtomicUsize::new(0)),
                steps: Arc::new(AtomicUsize::new(0)),
                fail_at_step: None,
                state: VehicleState::default(),
            }
        }
    }

    impl FwdSim for CountingSim {
        fn reset(&mut self, pose: [f64; 3]) -> Result<(), FwdSimError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            self.state = VehicleState {
                x: pose[0],
                y: pose[1],
                yaw: pose[2],
                ..Default::default()
            };
            Ok(())
        }

        fn step(&mut self, action: &ControlAction) -> Result<SimObservation, FwdSimError> {
            let n = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_at_step == Some(n) {
                return Err(FwdSimError::Diverged);
            }

            self.state.vx = action.speed;
            self.state.x += action.speed * self.dt_s;

            Ok(SimObservation {
                state: self.state,
                scan: LaserScan {
                    stamp_s: 0.0,
                    angle_min: -1.0,
                    angle_max: 1.0,
                    angle_increment: 2.0 / self.num_readings as f64,
                    range_min: 0.0,
                    range_max: 30.0,
                    ranges: vec![10.0; self.num_readings],
                },
            })
        }
    }

    fn engine(
        sim: CountingSim,
        policy: Arc<dyn PolicyBackend>,
        horizon: usize,
    ) -> RolloutEngine {
        RolloutEngine::new(
            Box::new(sim),
            PolicyAdapter::new(policy, 0.4189, 4.0),
            0.15875,
            0.17145,
            horizon,
        )
    }

    fn initial_state() -> VehicleState {
        VehicleState {
            vx: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_call_counts() {
        let sim = CountingSim::new(8);
        let (resets, sim_steps) = (sim.resets.clone(), sim.steps.clone());
        let policy = Arc::new(ConstPolicy::new(4, vec![0.5, 0.25]));
        let mut engine = engine(sim, policy.clone(), 2);

        // The real state inference is made by the caller
        let adapter = PolicyAdapter::new(policy.clone(), 0.4189, 4.0);
        let first = adapter
            .infer(&ObservationBundle::new(
                &ScanBuffer::uniform(4, 10.0),
                &initial_state(),
                &HeadingCommand::default(),
            ))
            .unwrap();

        let ids = CycleIds::new();
        let steps = engine.rollout(&initial_state(), &first, &ids.next()).unwrap();

        assert_eq!(steps.len(), 3);
        assert_eq!(policy.num_calls(), 3);
        assert_eq!(sim_steps.load(Ordering::SeqCst), 2);
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        // Step 0 is the real state, later steps come from the simulator driven at the policy speed
        assert_eq!(steps[0].state, initial_state());
        assert!((steps[0].steer - 0.20945).abs() < 1e-6);
        assert!((steps[1].state.x - 0.1).abs() < 1e-9);
        assert!((steps[2].state.x - 0.2).abs() < 1e-9);
        assert!((steps[2].state.vx - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sim_failure_aborts() {
        let mut sim = CountingSim::new(4);
        sim.fail_at_step = Some(2);
        let policy = Arc::new(ConstPolicy::new(4, vec![0.0, 0.5]));
        let mut engine = engine(sim, policy.clone(), 5);

        let ids = CycleIds::new();
        let res = engine.rollout(&initial_state(), &ControlAction::default(), &ids.next());

        assert!(matches!(
            res,
            Err(RolloutError::SimError(FwdSimError::Diverged))
        ));
        assert_eq!(policy.num_calls(), 1);
    }

    #[test]
    fn test_cancelled() {
        let sim = CountingSim::new(4);
        let sim_steps = sim.steps.clone();
        let policy = Arc::new(ConstPolicy::new(4, vec![0.0, 0.5]));
        let mut engine = engine(sim, policy, 5);

        let ids = CycleIds::new();
        let old = ids.next();
        let new = ids.next();

        assert!(old.is_cancelled());
        assert!(!new.is_cancelled());
        assert_eq!(ids.latest(), new.id());

        assert!(matches!(
            engine.rollout(&initial_state(), &ControlAction::default(), &old),
            Err(RolloutError::Cancelled(1))
        ));
        assert_eq!(sim_steps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_scan_too_short() {
        // Simulator produces fewer readings than the policy needs
        let sim = CountingSim::new(2);
        let policy = Arc::new(ConstPolicy::new(4, vec![0.0, 0.5]));
        let mut engine = engine(sim, policy, 2);

        let ids = CycleIds::new();
        assert!(matches!(
            engine.rollout(&initial_state(), &ControlAction::default(), &ids.next()),
            Err(RolloutError::ScanError(_))
        ));
    }

    #[test]
    fn test_in_loop_observations() {
        const LF: f64 = 0.15875;
        const LR: f64 = 0.17145;
        const STEER_MAX: f64 = 0.4189;

        let sim = CountingSim::new(8);
        let policy = Arc::new(SeqPolicy::new(4, 0.5));
        let mut engine = engine(sim, policy.clone(), 3);

        // Call 1 is the caller's inference on the real state
        let adapter = PolicyAdapter::new(policy.clone(), STEER_MAX, 4.0);
        let first = adapter
            .infer(&ObservationBundle::new(
                &ScanBuffer::uniform(4, 10.0),
                &initial_state(),
                &HeadingCommand::default(),
            ))
            .unwrap();

        let ids = CycleIds::new();
        let steps = engine.rollout(&initial_state(), &first, &ids.next()).unwrap();
        let seen = policy.seen.lock().unwrap();

        assert_eq!(steps.len(), 4);
        assert_eq!(seen.len(), 4);

        for i in 0..steps.len() {
            // Each step carries the steer inferred from its own state, which is call i + 1
            let steer = 0.1 * (i + 1) as f64 * STEER_MAX;
            assert!((steps[i].steer - steer).abs() < 1e-6, "step {}", i);
        }

        for i in 1..steps.len() {
            let obs = &seen[i];

            // The heading is the steer applied to reach this state, with its kinematic slip
            let applied = steps[i - 1].steer;
            assert!((obs.heading[[0, 0]] as f64 - applied).abs() < 1e-6, "step {}", i);
            assert!(
                (obs.heading[[0, 1]] as f64 - kinematic_slip(applied, LF, LR)).abs() < 1e-6,
                "step {}",
                i
            );

            // Pose, velocity and scan come from the simulator, which moves 0.2 m per step at 2 m/s
            let pose = steps[i].state.pose();
            assert!((steps[i].state.x - 0.2 * i as f64).abs() < 1e-9);
            for (o, p) in obs.pose.iter().zip(pose.iter()) {
                assert!((*o as f64 - p).abs() < 1e-6, "step {}", i);
            }
            assert!((obs.vel[[0, 0]] - 2.0).abs() < 1e-6);
            assert!(obs.scan.iter().all(|&r| r == 10.0));
        }
    }

    #[test]
    fn test_issue_ids() {
        let ids = CycleIds::new();

        let t5 = ids.issue(5);
        assert!(!t5.is_cancelled());
        assert_eq!(ids.latest(), 5);

        // Lower IDs are cancelled on issue and never move the latest ID back
        let t3 = ids.issue(3);
        assert!(t3.is_cancelled());
        assert_eq!(ids.latest(), 5);

        let t6 = ids.issue(6);
        assert!(t5.is_cancelled());
        assert!(!t6.is_cancelled());
        assert_eq!(ids.next().id(), 7);
    }
}
