//! Worker thread which runs rollouts without blocking the cycle.

// -----------------------------------------------------------------------------------------------
// INCLUDES
// -----------------------------------------------------------------------------------------------

use std::{
    sync::mpsc::{channel, Receiver, RecvTimeoutError, SendError, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, warn};

use super::{CancelToken, CycleIds, RolloutEngine, RolloutError, RolloutStep};
use crate::{policy::ControlAction, state_est::VehicleState};

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

/// Owns the rollout worker thread and the channels to it.
pub struct RolloutMgr {
    ids: CycleIds,

    worker_jh: Option<JoinHandle<Result<(), RolloutError>>>,

    worker_sender: Sender<WorkerSignal>,
    worker_reciever: Receiver<WorkerSignal>,

    horizon: usize,
}

/// A request for a rollout from the given state.
#[derive(Debug)]
pub struct RolloutRequest {
    token: CancelToken,
    state: VehicleState,
    first_action: ControlAction,
}

/// A completed rollout.
#[derive(Debug, Clone)]
pub struct RolloutResult {
    /// ID of the cycle which requested the rollout
    pub id: u64,

    /// The `horizon + 1` recorded steps
    pub steps: Vec<RolloutStep>,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

/// Signals passed between the manager and the worker thread.
#[derive(Debug)]
pub enum WorkerSignal {
    /// The worker should stop it's operations
    Stop,

    /// Run a rollout
    Rollout(Box<RolloutRequest>),

    /// The requested rollout has been completed
    Complete(Box<RolloutResult>),

    /// The requested rollout failed
    Error(u64, Box<RolloutError>),
}

/// The outcome of the latest cycle's rollout.
#[derive(Debug)]
pub enum RolloutOutcome {
    Complete(RolloutResult),
    Failed(u64, RolloutError),
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl RolloutMgr {
    /// Start the worker thread, which takes ownership of the engine.
    pub fn new(engine: RolloutEngine) -> Result<Self, RolloutError> {
        let horizon = engine.horizon();

        // Create channels
        let (worker_sender, rx) = channel();
        let (tx, worker_reciever) = channel();

        // Start worker thread
        let worker_jh = thread::Builder::new()
            .name("rollout::worker".into())
            .spawn(move || worker_thread(engine, tx, rx))
            .map_err(RolloutError::SpawnFailed)?;

        Ok(Self {
            ids: CycleIds::new(),
            worker_jh: Some(worker_jh),
            worker_sender,
            worker_reciever,
            horizon,
        })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Request a rollout for cycle `id`, cancelling any request for an earlier cycle.
    pub fn request(
        &mut self,
        id: u64,
        state: VehicleState,
        first_action: ControlAction,
    ) -> Result<(), RolloutError> {
        let token = self.ids.issue(id);

        self.worker_sender
            .send(WorkerSignal::Rollout(Box::new(RolloutRequest {
                token,
                state,
                first_action,
            })))?;

        Ok(())
    }

    /// Mark cycle `id` as started without requesting a rollout for it, cancelling any request for
    /// an earlier cycle.
    pub fn supersede(&mut self, id: u64) {
        self.ids.issue(id);
    }

    /// Check for the outcome of the latest request without blocking.
    ///
    /// Outcomes of superseded requests are discarded.
    pub fn poll(&mut self) -> Result<Option<RolloutOutcome>, RolloutError> {
        loop {
            let signal = match self.worker_reciever.try_recv() {
                Ok(s) => s,
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => return Err(RolloutError::WorkerDisconnected),
            };

            if let Some(outcome) = self.accept(signal) {
                return Ok(Some(outcome));
            }
        }
    }

    /// Wait up to `timeout` for the outcome of the latest request.
    pub fn wait(&mut self, timeout: Duration) -> Result<Option<RolloutOutcome>, RolloutError> {
        let deadline = std::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());

            let signal = match self.worker_reciever.recv_timeout(remaining) {
                Ok(s) => s,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RolloutError::WorkerDisconnected)
                }
            };

            if let Some(outcome) = self.accept(signal) {
                return Ok(Some(outcome));
            }
        }
    }

    /// Stop the worker thread and wait for it to exit.
    pub fn stop(mut self) -> Result<(), RolloutError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), RolloutError> {
        // Cancel anything in progress so the worker exits promptly
        self.ids.next();
        self.worker_sender.send(WorkerSignal::Stop).ok();

        match self.worker_jh.take() {
            Some(jh) => match jh.join() {
                Ok(r) => r,
                Err(_) => Err(RolloutError::WorkerDisconnected),
            },
            None => Ok(()),
        }
    }

    /// Filter signals from the worker down to those for the latest cycle.
    fn accept(&self, signal: WorkerSignal) -> Option<RolloutOutcome> {
        let latest = self.ids.latest();

        match signal {
            WorkerSignal::Complete(res) if res.id == latest => Some(RolloutOutcome::Complete(*res)),
            WorkerSignal::Error(id, e) if id == latest => Some(RolloutOutcome::Failed(id, *e)),
            WorkerSignal::Complete(res) => {
                debug!("Discarding rollout for superseded cycle {}", res.id);
                None
            }
            WorkerSignal::Error(id, e) => {
                debug!("Discarding failure of superseded cycle {}: {}", id, e);
                None
            }
            s => {
                warn!("Unexpected signal from rollout worker: {:?}", s);
                None
            }
        }
    }
}

impl Drop for RolloutMgr {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Rollout worker exited with error: {}", e);
        }
    }
}

impl From<SendError<WorkerSignal>> for RolloutError {
    fn from(_: SendError<WorkerSignal>) -> Self {
        Self::WorkerDisconnected
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

fn worker_thread(
    mut engine: RolloutEngine,
    main_sender: Sender<WorkerSignal>,
    main_reciever: Receiver<WorkerSignal>,
) -> Result<(), RolloutError> {
    // Wait for commands from main
    while let Ok(signal) = main_reciever.recv() {
        match signal {
            WorkerSignal::Stop => break,
            WorkerSignal::Rollout(req) => {
                let id = req.token.id();

                // Requests queued behind a newer one are skipped without touching the simulator
                let signal = match engine.rollout(&req.state, &req.first_action, &req.token) {
                    Ok(steps) => WorkerSignal::Complete(Box::new(RolloutResult { id, steps })),
                    Err(RolloutError::Cancelled(id)) => {
                        debug!("Rollout for cycle {} cancelled", id);
                        continue;
                    }
                    Err(e) => WorkerSignal::Error(id, Box::new(e)),
                };

                main_sender.send(signal)?;
            }
            s => warn!("Rollout worker received unexpected signal {:?}", s),
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        policy::{test::ConstPolicy, PolicyAdapter},
        rollout::test::CountingSim,
    };
    use std::sync::{atomic::Ordering, Arc};

    fn mgr(sim: CountingSim, horizon: usize) -> RolloutMgr {
        let engine = RolloutEngine::new(
            Box::new(sim),
            PolicyAdapter::new(Arc::new(ConstPolicy::new(4, vec![0.0, 0.25])), 0.4189, 4.0),
            0.15875,
            0.17145,
            horizon,
        );

        RolloutMgr::new(engine).unwrap()
    }

    fn first_action() -> ControlAction {
        ControlAction {
            steer: 0.0,
            speed: 1.0,
        }
    }

    #[test]
    fn test_request_complete() {
        let mut m = mgr(CountingSim::new(4), 4);

        let id = 1;
        m.request(id, VehicleState::default(), first_action()).unwrap();

        match m.wait(Duration::from_secs(5)).unwrap() {
            Some(RolloutOutcome::Complete(res)) => {
                assert_eq!(res.id, id);
                assert_eq!(res.steps.len(), 5);
            }
            o => panic!("Expected a complete rollout, got {:?}", o),
        }

        assert!(m.poll().unwrap().is_none());
        m.stop().unwrap();
    }

    #[test]
    fn test_failure_reported() {
        let mut sim = CountingSim::new(4);
        sim.fail_at_step = Some(1);
        let mut m = mgr(sim, 3);

        let id = 7;
        m.request(id, VehicleState::default(), first_action()).unwrap();

        match m.wait(Duration::from_secs(5)).unwrap() {
            Some(RolloutOutcome::Failed(fid, RolloutError::SimError(_))) => assert_eq!(fid, id),
            o => panic!("Expected a failed rollout, got {:?}", o),
        }
    }

    #[test]
    fn test_only_latest_accepted() {
        let sim = CountingSim::new(4);
        let resets = sim.resets.clone();
        let mut m = mgr(sim, 2);

        let last_id = 10;
        for id in 1..=last_id {
            m.request(id, VehicleState::default(), first_action()).unwrap();
        }

        // Only the last request's result is ever returned
        match m.wait(Duration::from_secs(5)).unwrap() {
            Some(RolloutOutcome::Complete(res)) => assert_eq!(res.id, last_id),
            o => panic!("Expected a complete rollout, got {:?}", o),
        }
        assert!(m.wait(Duration::from_millis(50)).unwrap().is_none());

        // Superseded requests never run to completion, at most they reset before being cancelled
        assert!(resets.load(Ordering::SeqCst) <= 10);
        assert!(resets.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_superseded_by_cycle_without_request() {
        let sim = CountingSim::new(4);
        let sim_steps = sim.steps.clone();
        let mut m = mgr(sim, 50);

        m.request(3, VehicleState::default(), first_action()).unwrap();
        m.supersede(4);

        // The outcome for cycle 3 is never accepted, whether it completed or was cancelled
        assert!(m.wait(Duration::from_millis(200)).unwrap().is_none());
        assert!(sim_steps.load(Ordering::SeqCst) <= 50);

        // A lower ID never takes over from the latest cycle
        m.request(2, VehicleState::default(), first_action()).unwrap();
        assert!(m.wait(Duration::from_millis(200)).unwrap().is_none());

        m.request(5, VehicleState::default(), first_action()).unwrap();
        match m.wait(Duration::from_secs(5)).unwrap() {
            Some(RolloutOutcome::Complete(res)) => assert_eq!(res.id, 5),
            o => panic!("Expected a complete rollout, got {:?}", o),
        }
    }
}
