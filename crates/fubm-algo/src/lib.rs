//! # fubm-algo: AC/DC Power Flow on the Flexible Universal Branch Model
//!
//! Numerical solvers for hybrid AC/DC grids where every branch (AC line,
//! transformer, VSC converter) is the same generalized pi element with a
//! controllable complex tap and an equivalent susceptance.
//!
//! ## Solvers
//!
//! | Solver | Strategy |
//! |--------|----------|
//! | [`NewtonRaphsonAcDc`] | Full Newton with a backtracking line search |
//! | [`LevenbergMarquardtAcDc`] | Damped least squares over the same residual |
//!
//! Both iterate over the FUBM unknowns (bus voltages plus the branch tap
//! modules, shift angles and equivalent susceptances that carry an active
//! control) and return the same [`fubm_core::PowerFlowResults`], with
//! non-convergence reported as data rather than an error.
//!
//! ## Pipeline
//!
//! - [`admittance`]: branch primitives and the bus admittance matrix
//! - [`losses`]: IEC 62751-2 converter switching-loss model
//! - [`mismatch`]: power balance and control residuals in canonical order
//! - [`derivatives`]: analytic partials of injections and flows
//! - [`jacobian`]: block-sparse Jacobian assembly
//! - [`slicer`]: named layout of the Newton step
//! - [`controls`]: reactive-limit switching and converter clamps
//!
//! ## Example
//!
//! ```ignore
//! use fubm_algo::NewtonRaphsonAcDc;
//!
//! let mut nc = build_snapshot()?;
//! let v0 = nc.vbus.clone();
//! let s0 = nc.sbus.clone();
//! let res = NewtonRaphsonAcDc::new().with_tolerance(1e-8).solve(&mut nc, &v0, &s0)?;
//! println!("converged: {} in {} iterations", res.converged, res.iterations);
//! ```

pub mod admittance;
pub mod controls;
pub mod derivatives;
pub mod jacobian;
pub mod levenberg;
pub mod losses;
pub mod mismatch;
pub mod newton;
pub mod slicer;
pub mod sparse;
mod state;

#[cfg(test)]
mod acdc_scenarios;

pub use admittance::{AdmittanceMatrices, BranchFlows};
pub use controls::{clamp_converter_controls, enforce_q_limits, QControlOutcome, ReactivePowerControlMode};
pub use derivatives::{ControlDerivatives, VoltageDerivatives};
pub use jacobian::build_fubm_jacobian;
pub use levenberg::LevenbergMarquardtAcDc;
pub use losses::switching_loss_conductance;
pub use mismatch::{compute_fx, Mismatch};
pub use newton::NewtonRaphsonAcDc;
pub use slicer::{SolutionSlicer, StepSlices};
