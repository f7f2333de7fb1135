//! Main reference trajectory executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise all modules
//!     - Main loop:
//!         - Sensor input acquisition from the replay script:
//!             - Laser scans, which update the latest scan
//!             - Odometry, each message triggering one RlMgr cycle
//!         - Collection of completed rollouts
//!         - Output saving and archiving
//!
//! # Usage
//!
//! ```text
//! rl_exec <replay_script>
//! ```
//!
//! `RL_TRAJ_SW_ROOT` must point at the directory containing `params/` and `sessions/`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use comms_if::eqpt::SensorMsg;
use log::{debug, info, warn};
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Internal
use rl_lib::{
    data_store::DataStore,
    fwd_sim::{FwdSim, FwdSimParams, StSim},
    params::{OutputMode, RlParams},
    policy::MlpPolicy,
    rl_mgr::{InitData, RlMgrError},
    rollout::RolloutError,
};
use util::{
    archive::Archived,
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    raise_error,
    replay::{PendingMsgs, SensorScript},
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Time to wait for the final rollout once the script has ended.
const FINAL_ROLLOUT_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("rl_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Reference Trajectory Executable\n");
    info!("Running on: {}", host::get_host_desc());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: RlParams =
        util::params::load("rl_exec.toml").wrap_err("Could not load rl_exec params")?;
    params
        .validate()
        .wrap_err("Invalid rl_exec parameters")?;

    info!("Exec parameters loaded");
    info!(
        "Odometry source: {}",
        if params.is_sim {
            "simulator ground truth"
        } else {
            "particle filter"
        }
    );

    // ---- INITIALISE INPUT SOURCE ----

    // Collect all arguments
    let args: Vec<String> = env::args().collect();

    debug!("CLI arguments: {:?}", args);

    let script_path = script_path(&args)?;

    info!("Loading replay script from \"{}\"", script_path);

    let mut script = SensorScript::new(script_path).wrap_err("Failed to load replay script")?;

    info!(
        "Loaded script lasts {:.02} s and contains {} messages\n",
        script.get_duration(),
        script.get_num_msgs()
    );

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let mut weights_path = params.policy_weights_path.clone();
    if weights_path.is_relative() {
        weights_path = host::get_sw_root()
            .wrap_err("Software root not set")?
            .join(weights_path);
    }
    let policy = MlpPolicy::load(&weights_path).wrap_err("Failed to load the policy")?;
    info!("Policy loaded from {:?}", weights_path);

    let sim: Option<Box<dyn FwdSim>> = match params.mode {
        OutputMode::Drive => None,
        OutputMode::Plan => {
            let fwd_sim_params: FwdSimParams =
                util::params::load("fwd_sim.toml").wrap_err("Could not load fwd_sim params")?;

            let sim = StSim::new(
                fwd_sim_params,
                params.lf_m,
                params.lr_m,
                params.rl_sim_time_step_s,
            )
            .wrap_err("Failed to create the forward simulator")?;
            info!("Forward simulator initialised");

            Some(Box::new(sim))
        }
    };

    let cycle_period_s = params.cycle_period_s;

    let mut ds = DataStore::default();

    ds.rl_mgr
        .init(
            InitData {
                params,
                policy: Arc::new(policy),
                sim,
            },
            Some(&session),
        )
        .wrap_err("Failed to initialise RlMgr")?;
    info!("RlMgr init complete");

    info!("Module initialisation complete\n");

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    loop {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        // Clear items that need wiping at the start of the cycle
        ds.cycle_start(1.0 / cycle_period_s);

        // ---- DATA INPUT ----

        match script.get_pending(ds.sim_time_s) {
            PendingMsgs::None => (),
            PendingMsgs::Some(msgs) => {
                for msg in msgs.iter() {
                    handle_msg(&mut ds, msg);
                }
            }
            // Exit if end of script reached
            PendingMsgs::EndOfScript => {
                info!("End of replay script reached, stopping");
                break;
            }
        }

        // ---- ROLLOUT COLLECTION ----

        match ds.rl_mgr.poll_output() {
            Ok(Some(output)) => ds.set_output(output),
            Ok(None) => (),
            Err(RlMgrError::RolloutError(RolloutError::WorkerDisconnected)) => {
                raise_error!("The rollout worker has stopped")
            }
            Err(e) => warn!("Error collecting rollout output: {}", e),
        }

        // ---- OUTPUT ----

        save_outputs(&ds);

        // ---- WRITE ARCHIVES ----

        if let Err(e) = ds.rl_mgr.write() {
            warn!("Could not write RlMgr archives: {}", e);
        }

        if ds.is_1_hz_cycle {
            info!(
                "{} odometry and {} scan messages processed, {} RlMgr cycles",
                ds.num_odom_msgs,
                ds.num_scan_msgs,
                ds.rl_mgr.num_cycles()
            );
        }

        // ---- CYCLE MANAGEMENT ----

        let cycle_dur = Instant::now() - cycle_start_instant;

        // Get sleep duration
        match Duration::from_secs_f64(cycle_period_s).checked_sub(cycle_dur) {
            Some(d) => {
                ds.num_consec_cycle_overruns = 0;
                thread::sleep(d);
            }
            None => {
                warn!(
                    "Cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - cycle_period_s
                );
                ds.num_consec_cycle_overruns += 1;
            }
        }

        // Increment cycle counter
        ds.num_cycles += 1;
    }

    // ---- SHUTDOWN ----

    // Collect the rollout of the final odometry message
    match ds.rl_mgr.wait_output(FINAL_ROLLOUT_TIMEOUT) {
        Ok(Some(output)) => {
            ds.set_output(output);
            save_outputs(&ds);
        }
        Ok(None) => (),
        Err(e) => warn!("Error collecting the final rollout: {}", e),
    }

    if let Err(e) = ds.rl_mgr.write() {
        warn!("Could not write RlMgr archives: {}", e);
    }

    ds.rl_mgr.stop().wrap_err("Failed to stop RlMgr")?;

    session.exit();

    info!("End of execution");

    Ok(())
}

/// Get the replay script path, the only argument after the executable name.
fn script_path(args: &[String]) -> Result<&str, Report> {
    match args {
        [_, path] => Ok(path.as_str()),
        _ => Err(eyre!(
            "Expected one argument (the replay script), found {}",
            args.len().saturating_sub(1)
        )),
    }
}

/// Pass a sensor message to the manager.
fn handle_msg(ds: &mut DataStore, msg: &SensorMsg) {
    match msg {
        SensorMsg::Scan(scan) => {
            ds.num_scan_msgs += 1;

            if let Err(e) = ds.rl_mgr.handle_scan(scan) {
                warn!("Could not process scan: {}", e);
            }
        }
        SensorMsg::Odom(odom) => {
            ds.num_odom_msgs += 1;

            match ds.rl_mgr.proc(odom) {
                Ok((output, report)) => {
                    ds.rl_mgr_status_rpt = Some(report);
                    if let Some(o) = output {
                        ds.set_output(o);
                    }
                }
                // Errors here are usually bad input data, so just issue the warning and continue
                Err(e) => warn!("Error during RlMgr processing: {}", e),
            }
        }
    }
}

/// Save this cycle's outputs into the session directory.
fn save_outputs(ds: &DataStore) {
    if let Some(ref cmd) = ds.drive_cmd {
        debug!(
            "Drive: steer {:.4} rad, speed {:.3} m/s",
            cmd.steering_angle_rad, cmd.speed_ms
        );
    }
    if let Some(ref traj) = ds.ref_traj {
        session::save_with_timestamp("ref_traj/ref_traj.json", traj.clone());
    }
    if let Some(ref markers) = ds.pose_markers {
        session::save_with_timestamp("viz/pose_markers.json", markers.clone());
    }
    if let Some(ref points) = ds.scan_points {
        if !points.is_empty() {
            session::save_with_timestamp("viz/scan_points.json", points.clone());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_script_path() {
        let args = |a: &[&str]| a.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(
            script_path(&args(&["rl_exec", "scripts/replay_corridor.txt"])).unwrap(),
            "scripts/replay_corridor.txt"
        );

        // Some platforms give an empty argument list
        let err = script_path(&[]).unwrap_err();
        assert!(err.to_string().contains("found 0"));

        assert!(script_path(&args(&["rl_exec"])).is_err());
        assert!(script_path(&args(&["rl_exec", "a", "b"])).is_err());
    }
}
