//! Nonlinear residual assembly
//!
//! Stacks the bus power balance and the branch control residuals into one
//! vector in a fixed canonical row order. The Jacobian assembler builds its
//! row blocks in this same order; the Newton step itself is laid out in the
//! independent order owned by [`crate::slicer::SolutionSlicer`].
//!
//! Row blocks:
//! 1. active power balance at pv and pq buses,
//! 2. reactive power balance at pq buses and at buses voltage-pinned
//!    through Beq or tap-module control,
//! 3. droop residual `-Sf.re + Pfset + Kdp·(Vm[F] - Vmfset)`,
//! 4. Qf-via-tap residual `Sf.im - Qfset`,
//! 5. zero-Qf residual `Sf.im`,
//! 6. Pf-via-shift residual `Sf.re - Pfset`,
//! 7. Qt-via-tap residual `St.im - Qtset`.
//!
//! The droop block's sign runs opposite to the other control residuals:
//! droop defines the power increase as the voltage rises, so the flow term
//! enters negated. Setpoints are stored in MW/MVAr and divided by the base
//! power here.

use num_complex::Complex64;

use crate::admittance::{AdmittanceMatrices, BranchFlows};
use fubm_core::{BusPartition, SnapshotData};

/// Residual vector, calculated injections and the convergence norm.
#[derive(Debug, Clone)]
pub struct Mismatch {
    /// Residuals in canonical row order
    pub fx: Vec<f64>,
    /// `Scalc = V·conj(Ybus·V)`
    pub s_calc: Vec<Complex64>,
    /// Infinity norm of `fx`
    pub norm: f64,
}

/// Reactive-balance row set: pq buses followed by the voltage-pinned buses.
pub fn reactive_rows(nc: &SnapshotData, part: &BusPartition) -> Vec<usize> {
    let mut rows = part.pq().to_vec();
    rows.extend_from_slice(&nc.control.vf_beq_bus);
    rows.extend_from_slice(&nc.control.vt_ma_bus);
    rows
}

/// Assemble the residual vector for the current state.
pub fn compute_fx(
    nc: &SnapshotData,
    adm: &AdmittanceMatrices,
    flows: &BranchFlows,
    v: &[Complex64],
    s0: &[Complex64],
    part: &BusPartition,
) -> Mismatch {
    let bd = &nc.branch_data;
    let ctrl = &nc.control;
    let sbase = nc.sbase;
    let s_calc = adm.bus_injections(v);

    let mut fx = Vec::with_capacity(
        part.pvpq().len()
            + part.npq()
            + ctrl.vf_beq_bus.len()
            + ctrl.vt_ma_bus.len()
            + ctrl.i_pfdp.len()
            + ctrl.i_qfma.len()
            + ctrl.i_beqz.len()
            + ctrl.i_pfsh.len()
            + ctrl.i_qtma.len(),
    );

    for &b in part.pvpq() {
        fx.push((s_calc[b] - s0[b]).re);
    }
    for b in reactive_rows(nc, part) {
        fx.push((s_calc[b] - s0[b]).im);
    }
    for &i in &ctrl.i_pfdp {
        let vm_f = v[bd.f[i]].norm();
        fx.push(-flows.sf[i].re + bd.pf_set[i] / sbase + bd.kdp[i] * (vm_f - bd.vf_set[i]));
    }
    for &i in &ctrl.i_qfma {
        fx.push(flows.sf[i].im - bd.qf_set[i] / sbase);
    }
    for &i in &ctrl.i_beqz {
        fx.push(flows.sf[i].im);
    }
    for &i in &ctrl.i_pfsh {
        fx.push(flows.sf[i].re - bd.pf_set[i] / sbase);
    }
    for &i in &ctrl.i_qtma {
        fx.push(flows.st[i].im - bd.qt_set[i] / sbase);
    }

    let norm = fx.iter().fold(0.0f64, |acc, x| acc.max(x.abs()));
    Mismatch { fx, s_calc, norm }
}
