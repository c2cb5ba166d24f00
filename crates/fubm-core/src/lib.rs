//! # fubm-core: FUBM Network Data Model
//!
//! Data structures shared by the unified AC/DC power-flow solvers built on
//! the flexible universal branch model (FUBM). Every branch is the same
//! generalized pi element: a plain AC line, a tap-changing or phase-shifting
//! transformer, and a VSC converter differ only in which of the branch's
//! control variables (tap module `m`, shift angle `theta`, equivalent
//! susceptance `Beq`) are free and which objective each one serves.
//!
//! ## Modules
//!
//! - [`snapshot`] - Compiled per-branch/per-bus arrays the solvers consume
//! - [`indices`] - Control index sets and the pv/pq bus partition
//! - [`results`] - Terminal solver state, convergence reported as data
//! - [`error`] - Unified [`FubmError`] for validation and numerical failures
//!
//! The numerical solvers (admittances, derivatives, Jacobian assembly,
//! Newton-Raphson and Levenberg-Marquardt) live in the `fubm-algo` crate.

pub mod error;
pub mod indices;
pub mod results;
pub mod snapshot;

pub use error::{FubmError, FubmResult};
pub use indices::{BusPartition, ControlIndices};
pub use results::PowerFlowResults;
pub use snapshot::{BranchData, BranchSpec, ShuntData, SnapshotBuilder, SnapshotData};
