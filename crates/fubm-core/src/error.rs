//! Unified error types for the FUBM power-flow crates
//!
//! This module provides a common error type [`FubmError`] shared by the data
//! model and the numerical core. Fatal numerical conditions (a non-square
//! Jacobian, a singular linear system) are explicit variants so callers can
//! distinguish configuration mistakes from plain non-convergence, which is
//! reported through the result structure rather than through errors.

use thiserror::Error;

/// Unified error type for the FUBM power-flow stack.
#[derive(Error, Debug)]
pub enum FubmError {
    /// Snapshot data failed validation (bad index, zero impedance, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The assembled Jacobian is not square. This is a configuration
    /// inconsistency in the control index sets, not a numerical failure;
    /// no partial solve is attempted.
    #[error("Jacobian is not square ({rows} rows x {cols} cols); inconsistent control index sets")]
    NonSquareJacobian { rows: usize, cols: usize },

    /// The direct linear solve produced a non-finite solution.
    #[error("Singular or ill-conditioned linear system during {0}")]
    SingularSystem(&'static str),

    /// Sparse block stacking received blocks with inconsistent shapes.
    #[error("Sparse block shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Solver/algorithm errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using FubmError.
pub type FubmResult<T> = Result<T, FubmError>;

impl From<anyhow::Error> for FubmError {
    fn from(err: anyhow::Error) -> Self {
        FubmError::Other(err.to_string())
    }
}

impl From<String> for FubmError {
    fn from(s: String) -> Self {
        FubmError::Other(s)
    }
}

impl From<&str> for FubmError {
    fn from(s: &str) -> Self {
        FubmError::Other(s.to_string())
    }
}
