//! Single-track kinematic vehicle simulation

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector5;

use super::{FwdSim, FwdSimError, FwdSimParams, Integrator, ScanSim, SimObservation};
use crate::{policy::ControlAction, state_est::VehicleState};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const X: usize = 0;
const Y: usize = 1;
const YAW: usize = 2;
const V: usize = 3;
const DELTA: usize = 4;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Kinematic single-track ("bicycle") model.
///
/// The state is `[x, y, yaw, v, delta]`. Steering angle and speed follow the commanded action
/// through saturated proportional servos, so the vehicle accelerates from rest after a reset rather
/// than jumping to the commanded speed.
pub struct StSim {
    params: FwdSimParams,
    lf_m: f64,
    lr_m: f64,
    dt_s: f64,
    scan_sim: ScanSim,

    state: Option<Vector5<f64>>,
    time_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StSim {
    pub fn new(params: FwdSimParams, lf_m: f64, lr_m: f64, dt_s: f64) -> Result<Self, FwdSimError> {
        if !(dt_s > 0.0 && lf_m > 0.0 && lr_m > 0.0) {
            return Err(FwdSimError::InvalidParams(
                "timestep and axle distances must be positive".into(),
            ));
        }
        if params.max_speed_ms < params.min_speed_ms {
            return Err(FwdSimError::InvalidParams(
                "max speed is below min speed".into(),
            ));
        }

        let scan_sim = ScanSim::new(params.scan.clone(), &params.walls)?;

        Ok(Self {
            params,
            lf_m,
            lr_m,
            dt_s,
            scan_sim,
            state: None,
            time_s: 0.0,
        })
    }

    /// Kinematic slip angle at the centre of gravity.
    fn beta(&self, delta: f64) -> f64 {
        (self.lr_m * delta.tan() / (self.lf_m + self.lr_m)).atan()
    }

    fn yaw_rate(&self, v: f64, delta: f64) -> f64 {
        v * self.beta(delta).cos() * delta.tan() / (self.lf_m + self.lr_m)
    }

    /// State derivative with the servo targets held constant.
    fn deriv(&self, s: &Vector5<f64>, target: &ControlAction) -> Vector5<f64> {
        let p = &self.params;
        let beta = self.beta(s[DELTA]);

        let steer_rate = clamp_abs(
            p.steer_servo_gain * (target.steer - s[DELTA]),
            p.max_steer_rate_rads,
        );
        let accel = clamp_abs(p.speed_servo_gain * (target.speed - s[V]), p.max_accel_mss);

        Vector5::new(
            s[V] * (s[YAW] + beta).cos(),
            s[V] * (s[YAW] + beta).sin(),
            self.yaw_rate(s[V], s[DELTA]),
            accel,
            steer_rate,
        )
    }

    fn integrate(&self, s: &Vector5<f64>, target: &ControlAction) -> Vector5<f64> {
        let dt = self.dt_s;

        match self.params.integrator {
            Integrator::Euler => s + self.deriv(s, target) * dt,
            Integrator::Rk4 => {
                let k1 = self.deriv(s, target);
                let k2 = self.deriv(&(s + k1 * (dt / 2.0)), target);
                let k3 = self.deriv(&(s + k2 * (dt / 2.0)), target);
                let k4 = self.deriv(&(s + k3 * dt), target);

                s + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
            }
        }
    }

    fn observe(&self, s: &Vector5<f64>) -> VehicleState {
        let beta = self.beta(s[DELTA]);

        VehicleState {
            x: s[X],
            y: s[Y],
            yaw: s[YAW],
            yaw_rate: self.yaw_rate(s[V], s[DELTA]),
            vx: s[V] * beta.cos(),
            vy: s[V] * beta.sin(),
        }
    }
}

impl FwdSim for StSim {
    fn reset(&mut self, pose: [f64; 3]) -> Result<(), FwdSimError> {
        if pose.iter().any(|v| !v.is_finite()) {
            return Err(FwdSimError::InvalidPose(pose));
        }

        self.state = Some(Vector5::new(pose[0], pose[1], pose[2], 0.0, 0.0));
        self.time_s = 0.0;

        Ok(())
    }

    fn step(&mut self, action: &ControlAction) -> Result<SimObservation, FwdSimError> {
        let s = self.state.ok_or(FwdSimError::NotReset)?;

        if !(action.steer.is_finite() && action.speed.is_finite()) {
            return Err(FwdSimError::InvalidAction(*action));
        }

        // Limits apply to the demand, the servos never overshoot so the state stays within them
        let target = ControlAction {
            steer: clamp_abs(action.steer, self.params.steer_limit_rad),
            speed: action
                .speed
                .max(self.params.min_speed_ms)
                .min(self.params.max_speed_ms),
        };

        let next = self.integrate(&s, &target);

        if next.iter().any(|v| !v.is_finite()) {
            self.state = None;
            return Err(FwdSimError::Diverged);
        }

        self.state = Some(next);
        self.time_s += self.dt_s;

        let state = self.observe(&next);
        let scan = self.scan_sim.scan(state.pose(), self.time_s);

        Ok(SimObservation { state, scan })
    }
}

fn clamp_abs(value: f64, limit: f64) -> f64 {
    util::maths::clamp(&value, &-limit, &limit)
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::fwd_sim::ScanSimParams;

    pub(crate) fn sim_params(integrator: Integrator) -> FwdSimParams {
        FwdSimParams {
            integrator,
            steer_servo_gain: 20.0,
            max_steer_rate_rads: 3.2,
            steer_limit_rad: 0.4189,
            speed_servo_gain: 5.0,
            max_accel_mss: 9.51,
            min_speed_ms: -5.0,
            max_speed_ms: 20.0,
            scan: ScanSimParams {
                num_readings: 16,
                angle_min_rad: -2.35,
                angle_max_rad: 2.35,
                range_min_m: 0.0,
                range_max_m: 30.0,
            },
            walls: vec![[-50.0, 3.0, 50.0, 3.0], [-50.0, -3.0, 50.0, -3.0]],
        }
    }

    fn sim(integrator: Integrator) -> StSim {
        StSim::new(sim_params(integrator), 0.15875, 0.17145, 0.025).unwrap()
    }

    #[test]
    fn test_straight_line() {
        for integrator in &[Integrator::Euler, Integrator::Rk4] {
            let mut s = sim(*integrator);
            s.reset([1.0, 2.0, 0.0]).unwrap();

            let action = ControlAction {
                steer: 0.0,
                speed: 2.0,
            };
            let mut prev_x = 1.0;
            for _ in 0..40 {
                let obs = s.step(&action).unwrap();
                assert!(obs.state.x >= prev_x);
                assert_eq!(obs.state.y, 2.0);
                assert_eq!(obs.state.yaw, 0.0);
                assert_eq!(obs.state.vy, 0.0);
                assert_eq!(obs.scan.ranges.len(), 16);
                prev_x = obs.state.x;
            }

            // Speed has converged towards the demand
            let obs = s.step(&action).unwrap();
            assert!((obs.state.vx - 2.0).abs() < 0.05, "{:?}", integrator);
        }
    }

    #[test]
    fn test_turn_direction() {
        let mut s = sim(Integrator::Rk4);
        s.reset([0.0, 0.0, 0.0]).unwrap();

        let action = ControlAction {
            steer: 0.3,
            speed: 2.0,
        };
        let mut last = None;
        for _ in 0..20 {
            last = Some(s.step(&action).unwrap());
        }
        let obs = last.unwrap();

        // Positive steer turns left
        assert!(obs.state.yaw > 0.0);
        assert!(obs.state.y > 0.0);
        assert!(obs.state.yaw_rate > 0.0);
        assert!(obs.state.vy > 0.0);
    }

    #[test]
    fn test_steer_limit() {
        let mut s = sim(Integrator::Euler);
        s.reset([0.0, 0.0, 0.0]).unwrap();

        for _ in 0..100 {
            s.step(&ControlAction {
                steer: 5.0,
                speed: 1.0,
            })
            .unwrap();
        }

        let delta = s.state.unwrap()[DELTA];
        assert!(delta <= 0.4189 + 1e-9);
        assert!((delta - 0.4189).abs() < 1e-3);
    }

    #[test]
    fn test_errors() {
        let mut s = sim(Integrator::Rk4);
        let action = ControlAction {
            steer: 0.0,
            speed: 1.0,
        };

        assert_eq!(s.step(&action), Err(FwdSimError::NotReset));
        assert!(matches!(
            s.reset([std::f64::NAN, 0.0, 0.0]),
            Err(FwdSimError::InvalidPose(_))
        ));

        s.reset([0.0, 0.0, 0.0]).unwrap();
        assert!(matches!(
            s.step(&ControlAction {
                steer: std::f64::INFINITY,
                speed: 0.0
            }),
            Err(FwdSimError::InvalidAction(_))
        ));
    }
}
