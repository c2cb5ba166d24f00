//! Numerical power-flow results
//!
//! Both solvers return the same [`PowerFlowResults`] structure whether they
//! converged or not. Non-convergence is data, not an error: `converged` is
//! false and `norm_f` carries the residual norm the solver stopped at, so
//! outer drivers can retry with another method or report the best point seen.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Terminal state of one power-flow solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerFlowResults {
    /// Complex bus voltages at the terminal point
    pub voltage: Vec<Complex64>,
    /// Whether the residual norm reached the tolerance
    pub converged: bool,
    /// Infinity norm of the mismatch vector at exit
    pub norm_f: f64,
    /// Calculated complex bus power injections at the terminal voltages (p.u.)
    pub s_calc: Vec<Complex64>,
    /// Terminal tap modules per branch
    pub tap_module: Vec<f64>,
    /// Terminal tap/shift angles per branch (rad)
    pub tap_angle: Vec<f64>,
    /// Terminal equivalent susceptances per branch (p.u.)
    pub beq: Vec<f64>,
    /// Newton/LM iterations consumed
    pub iterations: usize,
    /// Wall-clock solve time in seconds
    pub elapsed: f64,
}

impl PowerFlowResults {
    /// Voltage magnitudes (p.u.).
    pub fn voltage_magnitude(&self) -> Vec<f64> {
        self.voltage.iter().map(|v| v.norm()).collect()
    }

    /// Voltage angles (rad).
    pub fn voltage_angle(&self) -> Vec<f64> {
        self.voltage.iter().map(|v| v.arg()).collect()
    }
}
