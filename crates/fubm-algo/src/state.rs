//! Mutable solver state shared by the Newton and Levenberg-Marquardt loops
//!
//! The unknowns live in polar voltage coordinates plus the three branch
//! control vectors. Both solvers mutate the state through [`SolverState::apply`]
//! and re-evaluate the network through [`SolverState::refresh`], which runs
//! the full dependency chain: the admittances depend on the switching losses,
//! the losses depend on the currents, and the currents depend on the
//! admittances. One extra admittance pass with the updated `Gsw` closes that
//! loop per refresh, matching the loss model's fixed-point treatment.

use num_complex::Complex64;

use crate::admittance::AdmittanceMatrices;
use crate::losses::switching_loss_conductance;
use crate::mismatch::{compute_fx, Mismatch};
use crate::slicer::StepSlices;
use fubm_core::{BusPartition, ControlIndices, SnapshotData};

/// All solver unknowns plus the derived switching-loss conductances.
#[derive(Debug, Clone)]
pub(crate) struct SolverState {
    pub va: Vec<f64>,
    pub vm: Vec<f64>,
    pub v: Vec<Complex64>,
    pub m: Vec<f64>,
    pub theta: Vec<f64>,
    pub beq: Vec<f64>,
    pub gsw: Vec<f64>,
}

/// One full network evaluation at the current state.
pub(crate) struct Evaluation {
    pub adm: AdmittanceMatrices,
    pub mis: Mismatch,
}

impl SolverState {
    /// Seed from the snapshot's timestep `t` and the initial voltage guess.
    pub fn init(nc: &SnapshotData, v0: &[Complex64], t: usize) -> Self {
        Self {
            va: v0.iter().map(|v| v.arg()).collect(),
            vm: v0.iter().map(|v| v.norm()).collect(),
            v: v0.to_vec(),
            m: nc.branch_data.tap_module[t].clone(),
            theta: nc.branch_data.tap_angle[t].clone(),
            beq: nc.branch_data.beq[t].clone(),
            gsw: nc.branch_data.g0sw.clone(),
        }
    }

    /// Rebuild the complex voltage from the polar coordinates.
    pub fn sync_voltage(&mut self) {
        for (v, (&vm, &va)) in self.v.iter_mut().zip(self.vm.iter().zip(&self.va)) {
            *v = Complex64::from_polar(vm, va);
        }
    }

    /// Re-evaluate admittances, switching losses, flows and the residual.
    pub fn refresh(
        &mut self,
        nc: &SnapshotData,
        s0: &[Complex64],
        part: &BusPartition,
    ) -> Evaluation {
        self.sync_voltage();
        let adm = AdmittanceMatrices::compute(nc, &self.m, &self.theta, &self.beq, &self.gsw);
        let flows = adm.branch_flows(nc, &self.v);
        self.gsw = switching_loss_conductance(nc, &self.v, &flows.it);
        let adm = AdmittanceMatrices::compute(nc, &self.m, &self.theta, &self.beq, &self.gsw);
        let flows = adm.branch_flows(nc, &self.v);
        let mis = compute_fx(nc, &adm, &flows, &self.v, s0, part);
        Evaluation { adm, mis }
    }

    /// Add `multiplier` times a sliced step onto the unknowns.
    ///
    /// The descent direction is applied with a negative multiplier; the slice
    /// ordering follows the [`crate::slicer::SolutionSlicer`] layout.
    pub fn apply(
        &mut self,
        slices: &StepSlices,
        part: &BusPartition,
        ctrl: &ControlIndices,
        multiplier: f64,
    ) {
        for (&b, &d) in part.pvpq().iter().zip(&slices.d_va) {
            self.va[b] += multiplier * d;
        }
        for (&b, &d) in part.pq().iter().zip(&slices.d_vm) {
            self.vm[b] += multiplier * d;
        }
        for (&i, &d) in ctrl.i_beqz.iter().zip(&slices.d_beq_z) {
            self.beq[i] += multiplier * d;
        }
        for (&i, &d) in ctrl.i_beqv.iter().zip(&slices.d_beq_v) {
            self.beq[i] += multiplier * d;
        }
        for (&i, &d) in ctrl.i_qfma.iter().zip(&slices.d_ma_qf) {
            self.m[i] += multiplier * d;
        }
        for (&i, &d) in ctrl.i_qtma.iter().zip(&slices.d_ma_qt) {
            self.m[i] += multiplier * d;
        }
        for (&i, &d) in ctrl.i_vtma.iter().zip(&slices.d_ma_vt) {
            self.m[i] += multiplier * d;
        }
        for (&i, &d) in ctrl.i_pfsh.iter().zip(&slices.d_theta_pf) {
            self.theta[i] += multiplier * d;
        }
        for (&i, &d) in ctrl.i_pfdp.iter().zip(&slices.d_theta_pd) {
            self.theta[i] += multiplier * d;
        }
        self.sync_voltage();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slicer::SolutionSlicer;
    use fubm_core::{BranchSpec, SnapshotBuilder};

    fn vsc_case() -> SnapshotData {
        let mut b = SnapshotBuilder::new(3, 100.0);
        b.pq_bus(1).pq_bus(2);
        b.add_branch(BranchSpec { f: 0, t: 1, r: 0.01, x: 0.1, ..Default::default() });
        let vsc = b.add_branch(BranchSpec { f: 1, t: 2, r: 0.001, x: 0.05, ..Default::default() });
        b.mark_vsc(vsc, 0.001, 0.002, 0.01)
            .control_zero_qf(vsc)
            .control_pf_shift(vsc, 5.0);
        b.build().unwrap()
    }

    #[test]
    fn apply_routes_each_slice_to_its_unknown() {
        let nc = vsc_case();
        let part = BusPartition::new(vec![], vec![1, 2]);
        let mut st = SolverState::init(&nc, &nc.vbus, 0);
        let slicer = SolutionSlicer::from_partition(&part, &nc.control);
        // layout: Va(2), Vm(2), Beq_z(1), theta_Pf(1)
        let dx = vec![0.01, 0.02, -0.01, -0.02, 0.3, 0.4];
        let slices = slicer.slice(&dx).unwrap();
        st.apply(&slices, &part, &nc.control, 1.0);
        assert!((st.va[1] - 0.01).abs() < 1e-15);
        assert!((st.va[2] - 0.02).abs() < 1e-15);
        assert!((st.vm[1] - 0.99).abs() < 1e-15);
        assert!((st.vm[2] - 0.98).abs() < 1e-15);
        assert!((st.beq[1] - 0.3).abs() < 1e-15);
        assert!((st.theta[1] - 0.4).abs() < 1e-15);
        // untouched slots stay put
        assert_eq!(st.va[0], 0.0);
        assert_eq!(st.beq[0], 0.0);
        // complex voltage tracks the polar move
        assert!((st.v[1] - Complex64::from_polar(0.99, 0.01)).norm() < 1e-15);
    }

    #[test]
    fn refresh_updates_switching_losses() {
        let nc = vsc_case();
        let part = BusPartition::new(vec![], vec![1, 2]);
        let mut st = SolverState::init(&nc, &nc.vbus, 0);
        // force a current through the converter
        st.vm[2] = 0.95;
        st.va[2] = -0.05;
        let eval = st.refresh(&nc, &nc.sbus, &part);
        assert!(st.gsw[1] > 0.0, "converter loss conductance must react to current");
        assert_eq!(st.gsw[0], 0.0);
        assert!(eval.mis.norm > 0.0);
    }

    #[test]
    fn negative_multiplier_reverses_a_step() {
        let nc = vsc_case();
        let part = BusPartition::new(vec![], vec![1, 2]);
        let mut st = SolverState::init(&nc, &nc.vbus, 0);
        let before = st.clone();
        let slicer = SolutionSlicer::from_partition(&part, &nc.control);
        let dx = vec![0.1; slicer.total()];
        let slices = slicer.slice(&dx).unwrap();
        st.apply(&slices, &part, &nc.control, 1.0);
        st.apply(&slices, &part, &nc.control, -1.0);
        for (a, b) in st.va.iter().zip(&before.va) {
            assert!((a - b).abs() < 1e-15);
        }
        for (a, b) in st.m.iter().zip(&before.m) {
            assert!((a - b).abs() < 1e-15);
        }
    }
}
