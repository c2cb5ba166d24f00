//! Discrete control actions applied between Newton iterations
//!
//! Two families of actions run once an accepted step has brought the
//! residual low enough to trust the decisions:
//! - reactive-limit enforcement, which demotes pv buses whose calculated
//!   reactive output leaves its band and pins the injection at the limit,
//! - clamping of converter tap modules, shift angles and equivalent
//!   susceptances into their bounds.
//!
//! Demotion is one-directional within a solve: a bus that left the pv set
//! never returns, which avoids the classic pv/pq oscillation. The clamps are
//! silent; an out-of-bounds value is pulled to its bound, not reported.

use num_complex::Complex64;

use fubm_core::{BusPartition, SnapshotData};

/// Reactive power control mode for the Newton solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReactivePowerControlMode {
    /// Never touch bus types
    #[default]
    NoControl,
    /// Enforce per-bus reactive limits by pv -> pq switching
    Direct,
}

/// Result of one reactive-limit pass.
#[derive(Debug, Clone)]
pub struct QControlOutcome {
    /// Buses demoted from pv to pq in this pass
    pub demoted: Vec<usize>,
    /// Target injections with demoted buses pinned at their violated limit
    pub s0: Vec<Complex64>,
    /// Fresh partition; the caller must rebuild anything derived from it
    pub partition: BusPartition,
}

impl QControlOutcome {
    pub fn changed(&self) -> bool {
        !self.demoted.is_empty()
    }
}

/// Check every pv bus against its reactive band `[Qmin, Qmax]` (p.u.).
///
/// A violating bus is demoted to pq and its target reactive injection is
/// pinned at the violated limit, so the next mismatch evaluation drives the
/// solution toward the limited output instead of the voltage setpoint.
pub fn enforce_q_limits(
    s_calc: &[Complex64],
    s0: &[Complex64],
    part: &BusPartition,
    qmin: &[f64],
    qmax: &[f64],
) -> QControlOutcome {
    let mut demoted = Vec::new();
    let mut s0_new = s0.to_vec();

    for &b in part.pv() {
        let q = s_calc[b].im;
        if q > qmax[b] {
            s0_new[b] = Complex64::new(s0[b].re, qmax[b]);
            demoted.push(b);
        } else if q < qmin[b] {
            s0_new[b] = Complex64::new(s0[b].re, qmin[b]);
            demoted.push(b);
        }
    }

    QControlOutcome {
        partition: part.demote_to_pq(&demoted),
        demoted,
        s0: s0_new,
    }
}

/// Clamp every converter branch's controls into their bounds.
/// Returns true if anything moved.
pub fn clamp_converter_controls(
    nc: &SnapshotData,
    m: &mut [f64],
    theta: &mut [f64],
    beq: &mut [f64],
) -> bool {
    let bd = &nc.branch_data;
    let mut moved = false;
    for &i in &nc.control.i_vsc {
        let m_c = m[i].clamp(bd.tap_module_min[i], bd.tap_module_max[i]);
        let t_c = theta[i].clamp(bd.tap_angle_min[i], bd.tap_angle_max[i]);
        let b_c = beq[i].clamp(bd.beq_min[i], bd.beq_max[i]);
        moved |= m_c != m[i] || t_c != theta[i] || b_c != beq[i];
        m[i] = m_c;
        theta[i] = t_c;
        beq[i] = b_c;
    }
    moved
}
