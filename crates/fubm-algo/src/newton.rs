//! Newton-Raphson AC/DC power flow with line search
//!
//! Full Newton iteration over the FUBM unknowns (bus voltages plus branch
//! control variables) with a backtracking line search: each step direction is
//! tried at the full length first, then shrunk geometrically until the
//! residual norm improves. If no step length improves the residual the solver
//! restores the last good state and gives up, returning a non-converged
//! result rather than an error.
//!
//! Once the residual norm drops below [`CONTROL_ACTIVATION_NORM`] the
//! discrete control layer kicks in after each accepted step: converter
//! controls are clamped into their bounds and, in
//! [`ReactivePowerControlMode::Direct`], generator reactive limits are
//! enforced by pv to pq switching. Both actions change the problem shape, so
//! the partition, the step layout and the residual are rebuilt on the spot.

use log::{debug, trace};
use num_complex::Complex64;
use web_time::Instant;

use crate::controls::{clamp_converter_controls, enforce_q_limits, ReactivePowerControlMode};
use crate::jacobian::build_fubm_jacobian;
use crate::slicer::SolutionSlicer;
use crate::sparse::solve_linear_system;
use crate::state::SolverState;
use fubm_core::{BusPartition, FubmError, FubmResult, PowerFlowResults, SnapshotData};

/// Residual norm below which discrete control actions are trusted.
const CONTROL_ACTIVATION_NORM: f64 = 1e-2;

/// Newton-Raphson solver over one snapshot timestep.
#[derive(Debug, Clone)]
pub struct NewtonRaphsonAcDc {
    tolerance: f64,
    max_iter: usize,
    mu0: f64,
    acceleration_parameter: f64,
    control_q: ReactivePowerControlMode,
    time_index: usize,
    verbose: bool,
}

impl Default for NewtonRaphsonAcDc {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iter: 15,
            mu0: 1.0,
            acceleration_parameter: 0.05,
            control_q: ReactivePowerControlMode::NoControl,
            time_index: 0,
            verbose: false,
        }
    }
}

impl NewtonRaphsonAcDc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Initial step length of the line search.
    pub fn with_mu0(mut self, mu0: f64) -> Self {
        self.mu0 = mu0;
        self
    }

    /// Step length shrink factor applied on each failed backtrack.
    pub fn with_acceleration_parameter(mut self, acceleration_parameter: f64) -> Self {
        self.acceleration_parameter = acceleration_parameter;
        self
    }

    pub fn with_q_control(mut self, control_q: ReactivePowerControlMode) -> Self {
        self.control_q = control_q;
        self
    }

    /// Which snapshot timestep to read the branch state from and write the
    /// terminal state back to.
    pub fn with_time_index(mut self, time_index: usize) -> Self {
        self.time_index = time_index;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run the solve from voltage guess `v0` with target injections `s0`
    /// (p.u.). The terminal branch control state is written back into the
    /// snapshot whether or not the iteration converged.
    pub fn solve(
        &self,
        nc: &mut SnapshotData,
        v0: &[Complex64],
        s0: &[Complex64],
    ) -> FubmResult<PowerFlowResults> {
        if v0.len() != nc.nbus || s0.len() != nc.nbus {
            return Err(FubmError::ShapeMismatch(format!(
                "v0/s0 have lengths {}/{}, snapshot has {} buses",
                v0.len(),
                s0.len(),
                nc.nbus
            )));
        }
        let start = Instant::now();
        let t = self.time_index;

        let mut part = BusPartition::reconcile(
            &nc.pv,
            &nc.pq,
            &nc.control.voltage_controlled_buses(),
        );
        let mut s0 = s0.to_vec();
        let mut state = SolverState::init(nc, v0, t);
        let mut eval = state.refresh(nc, &s0, &part);
        let mut converged = eval.mis.norm < self.tolerance;
        let mut iterations = 0;
        let mut aborted = false;

        'outer: while !converged && iterations < self.max_iter {
            let jac = build_fubm_jacobian(nc, &eval.adm, &state.v, &state.m, &state.beq, &part)?;
            let rhs: Vec<f64> = eval.mis.fx.iter().map(|f| -f).collect();
            // a singular factorization means the operating point is
            // degenerate (for instance zero branch currents making the flow
            // sensitivities linearly dependent), not that the controls are
            // misconfigured: keep the last stable state and report
            // non-convergence
            let dx = match solve_linear_system(&jac, &rhs, "newton step") {
                Ok(dx) => dx,
                Err(FubmError::SingularSystem(_)) => {
                    aborted = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            let slicer = SolutionSlicer::from_partition(&part, &nc.control);
            let slices = slicer.slice(&dx)?;

            // backtracking line search on the residual norm
            let backup = state.clone();
            let prev_norm = eval.mis.norm;
            let mut mu = self.mu0;
            let mut back_iter = 0;
            loop {
                state.apply(&slices, &part, &nc.control, mu);
                let trial = state.refresh(nc, &s0, &part);
                if trial.mis.norm <= prev_norm {
                    eval = trial;
                    break;
                }
                state = backup.clone();
                mu *= self.acceleration_parameter;
                back_iter += 1;
                if back_iter >= self.max_iter || mu <= self.tolerance {
                    // no step length improves the residual: restore and stop
                    eval = state.refresh(nc, &s0, &part);
                    aborted = true;
                    break 'outer;
                }
            }
            iterations += 1;

            if eval.mis.norm < CONTROL_ACTIVATION_NORM {
                if clamp_converter_controls(nc, &mut state.m, &mut state.theta, &mut state.beq) {
                    eval = state.refresh(nc, &s0, &part);
                }
                if self.control_q == ReactivePowerControlMode::Direct && part.npv() > 0 {
                    let out = enforce_q_limits(
                        &eval.mis.s_calc,
                        &s0,
                        &part,
                        &nc.qmin_bus,
                        &nc.qmax_bus,
                    );
                    if out.changed() {
                        if self.verbose {
                            debug!("reactive limits: demoted buses {:?}", out.demoted);
                        }
                        s0 = out.s0;
                        part = out.partition;
                        eval = state.refresh(nc, &s0, &part);
                    }
                }
            }

            converged = eval.mis.norm < self.tolerance;
            if self.verbose {
                debug!(
                    "newton iteration {iterations}: norm {:.3e}, mu {mu:.3e}",
                    eval.mis.norm
                );
            } else {
                trace!(
                    "newton iteration {iterations}: norm {:.3e}, mu {mu:.3e}",
                    eval.mis.norm
                );
            }
        }

        nc.set_snapshot_state(t, &state.m, &state.theta, &state.beq);
        Ok(PowerFlowResults {
            voltage: state.v.clone(),
            converged: converged && !aborted,
            norm_f: eval.mis.norm,
            s_calc: eval.mis.s_calc,
            tap_module: state.m,
            tap_angle: state.theta,
            beq: state.beq,
            iterations,
            elapsed: start.elapsed().as_secs_f64(),
        })
    }
}
