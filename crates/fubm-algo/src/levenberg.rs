//! Levenberg-Marquardt AC/DC power flow
//!
//! Damped least-squares iteration over the same residual and Jacobian as the
//! Newton solver. Instead of a line search, a damping factor blends the step
//! between Gauss-Newton and gradient descent: each step solves
//!
//! ```text
//! (JᵀJ + λI) dx = Jᵀ f
//! ```
//!
//! and the gain ratio between the predicted and the actual objective decrease
//! decides whether the step is kept and how λ moves. A rejected step leaves
//! the state untouched, inflates λ and retries with the same Jacobian, which
//! makes the method considerably more robust than plain Newton on poorly
//! conditioned cases at the price of more iterations.

use log::{debug, trace};
use num_complex::Complex64;
use sprs::{CsMat, TriMat};
use web_time::Instant;

use crate::jacobian::build_fubm_jacobian;
use crate::slicer::SolutionSlicer;
use crate::sparse::{mul_vec, solve_linear_system};
use crate::state::SolverState;
use fubm_core::{BusPartition, FubmError, FubmResult, PowerFlowResults, SnapshotData};

/// Levenberg-Marquardt solver over one snapshot timestep.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtAcDc {
    tolerance: f64,
    max_iter: usize,
    time_index: usize,
    verbose: bool,
}

impl Default for LevenbergMarquardtAcDc {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iter: 50,
            time_index: 0,
            verbose: false,
        }
    }
}

/// λ shrink factor after an accepted step with gain ratio `rho`.
fn lambda_shrink(rho: f64) -> f64 {
    let c = 2.0 * rho - 1.0;
    (1.0 - c * c * c).max(1.0 / 3.0)
}

fn scaled_identity(n: usize, lambda: f64) -> CsMat<f64> {
    let mut tri = TriMat::new((n, n));
    for i in 0..n {
        tri.add_triplet(i, i, lambda);
    }
    tri.to_csr()
}

fn max_diagonal(m: &CsMat<f64>) -> f64 {
    (0..m.rows())
        .filter_map(|i| m.get(i, i).copied())
        .fold(0.0f64, f64::max)
}

impl LevenbergMarquardtAcDc {
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

        let part = BusPartition::reconcile(
            &nc.pv,
            &nc.pq,
            &nc.control.voltage_controlled_buses(),
        );
        let mut state = SolverState::init(nc, v0, t);
        let mut eval = state.refresh(nc, s0, &part);

        // nothing to solve for: every bus is the slack
        if part.npv() + part.npq() == 0 {
            nc.set_snapshot_state(t, &state.m, &state.theta, &state.beq);
            return Ok(PowerFlowResults {
                voltage: state.v.clone(),
                converged: true,
                norm_f: eval.mis.norm,
                s_calc: eval.mis.s_calc,
                tap_module: state.m,
                tap_angle: state.theta,
                beq: state.beq,
                iterations: 0,
                elapsed: start.elapsed().as_secs_f64(),
            });
        }

        let slicer = SolutionSlicer::from_partition(&part, &nc.control);
        let mut converged = eval.mis.norm < self.tolerance;
        let mut iterations = 0;
        let mut update_jacobian = true;
        let mut lambda = 0.0;
        let mut nu = 2.0;
        let mut f_prev = 1e9;
        let mut h1 = CsMat::zero((0, 0));
        let mut h2 = CsMat::zero((0, 0));

        while !converged && iterations < self.max_iter {
            if update_jacobian {
                let h = build_fubm_jacobian(nc, &eval.adm, &state.v, &state.m, &state.beq, &part)?;
                h1 = h.transpose_view().to_csr();
                h2 = &h1 * &h;
                if iterations == 0 {
                    lambda = 1e-3 * max_diagonal(&h2);
                }
            }

            let a = &h2 + &scaled_identity(h2.rows(), lambda);
            let rhs = mul_vec(&h1, &eval.mis.fx);
            let f: f64 = 0.5 * eval.mis.fx.iter().map(|x| x * x).sum::<f64>();
            let dx = solve_linear_system(&a, &rhs, "levenberg-marquardt step")?;

            let val: f64 = dx
                .iter()
                .zip(&rhs)
                .map(|(&d, &r)| d * (lambda * d + r))
                .sum();
            let rho = if val > 0.0 { (f_prev - f) / (0.5 * val) } else { -1.0 };

            if rho >= 0.0 {
                update_jacobian = true;
                lambda *= lambda_shrink(rho);
                nu = 2.0;
                // descent direction: the step is subtracted
                let slices = slicer.slice(&dx)?;
                state.apply(&slices, &part, &nc.control, -1.0);
                f_prev = f;
            } else {
                update_jacobian = false;
                lambda *= nu;
                nu *= 2.0;
            }

            eval = state.refresh(nc, s0, &part);
            converged = eval.mis.norm < self.tolerance;
            iterations += 1;
            if self.verbose {
                debug!(
                    "lm iteration {iterations}: norm {:.3e}, lambda {lambda:.3e}, rho {rho:.3}",
                    eval.mis.norm
                );
            } else {
                trace!(
                    "lm iteration {iterations}: norm {:.3e}, lambda {lambda:.3e}, rho {rho:.3}",
                    eval.mis.norm
                );
            }
        }

        nc.set_snapshot_state(t, &state.m, &state.theta, &state.beq);
        Ok(PowerFlowResults {
            voltage: state.v.clone(),
            converged,
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
