//! Newton-step layout and slicing
//!
//! The flat increment vector produced by the linear solve is laid out in a
//! fixed construction order that mirrors the Jacobian's column groups:
//! `Va`, `Vm`, `Beq_z`, `Beq_v`, `ma_Qf`, `ma_Qt`, `ma_Vt`, `theta_Pf`,
//! `theta_Pd`. The slicer owns the nine cumulative offsets of that layout
//! and splits a step into named sub-vectors; consumers address the pieces by
//! field name, never by position. The offsets must be rebuilt whenever a
//! reactive-limit switch changes the pv/pq sizes.

use fubm_core::{BusPartition, ControlIndices, FubmError, FubmResult};

/// Cumulative offsets into the flat Newton step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolutionSlicer {
    a0: usize,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
    a6: usize,
    a7: usize,
    a8: usize,
    a9: usize,
}

/// One Newton step split into named physical increments.
#[derive(Debug, Clone)]
pub struct StepSlices {
    /// Angle increments at pv then pq buses
    pub d_va: Vec<f64>,
    /// Magnitude increments at pq buses
    pub d_vm: Vec<f64>,
    /// Susceptance increments for the zero-Qf branches
    pub d_beq_z: Vec<f64>,
    /// Susceptance increments for the Vf-controlling branches
    pub d_beq_v: Vec<f64>,
    /// Tap module increments for the Qf-controlling branches
    pub d_ma_qf: Vec<f64>,
    /// Tap module increments for the Qt-controlling branches
    pub d_ma_qt: Vec<f64>,
    /// Tap module increments for the Vt-controlling branches
    pub d_ma_vt: Vec<f64>,
    /// Shift angle increments for the Pf-controlling branches
    pub d_theta_pf: Vec<f64>,
    /// Shift angle increments for the droop-controlled branches
    pub d_theta_pd: Vec<f64>,
}

impl SolutionSlicer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        npq: usize,
        npv: usize,
        n_vf_beq: usize,
        n_vt_ma: usize,
        n_pfsh: usize,
        n_qfma: usize,
        n_beqz: usize,
        n_qtma: usize,
        n_pfdp: usize,
    ) -> Self {
        let a0 = 0;
        let a1 = a0 + npq + npv;
        let a2 = a1 + npq;
        let a3 = a2 + n_beqz;
        let a4 = a3 + n_vf_beq;
        let a5 = a4 + n_qfma;
        let a6 = a5 + n_qtma;
        let a7 = a6 + n_vt_ma;
        let a8 = a7 + n_pfsh;
        let a9 = a8 + n_pfdp;
        Self { a0, a1, a2, a3, a4, a5, a6, a7, a8, a9 }
    }

    /// Offsets for the current bus partition and control sets.
    pub fn from_partition(part: &BusPartition, ctrl: &ControlIndices) -> Self {
        Self::new(
            part.npq(),
            part.npv(),
            ctrl.vf_beq_bus.len(),
            ctrl.vt_ma_bus.len(),
            ctrl.i_pfsh.len(),
            ctrl.i_qfma.len(),
            ctrl.i_beqz.len(),
            ctrl.i_qtma.len(),
            ctrl.i_pfdp.len(),
        )
    }

    /// Total step length.
    pub fn total(&self) -> usize {
        self.a9
    }

    /// Split a flat step into its named increments.
    pub fn slice(&self, dx: &[f64]) -> FubmResult<StepSlices> {
        if dx.len() != self.a9 {
            return Err(FubmError::ShapeMismatch(format!(
                "step has length {}, slicer expects {}",
                dx.len(),
                self.a9
            )));
        }
        Ok(StepSlices {
            d_va: dx[self.a0..self.a1].to_vec(),
            d_vm: dx[self.a1..self.a2].to_vec(),
            d_beq_z: dx[self.a2..self.a3].to_vec(),
            d_beq_v: dx[self.a3..self.a4].to_vec(),
            d_ma_qf: dx[self.a4..self.a5].to_vec(),
            d_ma_qt: dx[self.a5..self.a6].to_vec(),
            d_ma_vt: dx[self.a6..self.a7].to_vec(),
            d_theta_pf: dx[self.a7..self.a8].to_vec(),
            d_theta_pd: dx[self.a8..self.a9].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_cover_the_whole_step() {
        let s = SolutionSlicer::new(3, 2, 1, 1, 2, 1, 1, 1, 1);
        assert_eq!(s.total(), 5 + 3 + 1 + 1 + 1 + 1 + 1 + 2 + 1);
        let dx: Vec<f64> = (0..s.total()).map(|i| i as f64).collect();
        let sl = s.slice(&dx).unwrap();
        assert_eq!(sl.d_va, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(sl.d_vm, vec![5.0, 6.0, 7.0]);
        assert_eq!(sl.d_beq_z, vec![8.0]);
        assert_eq!(sl.d_beq_v, vec![9.0]);
        assert_eq!(sl.d_ma_qf, vec![10.0]);
        assert_eq!(sl.d_ma_qt, vec![11.0]);
        assert_eq!(sl.d_ma_vt, vec![12.0]);
        assert_eq!(sl.d_theta_pf, vec![13.0, 14.0]);
        assert_eq!(sl.d_theta_pd, vec![15.0]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let s = SolutionSlicer::new(1, 0, 0, 0, 0, 0, 0, 0, 0);
        assert!(s.slice(&[0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn rebuild_after_partition_change_shifts_offsets() {
        let before = SolutionSlicer::new(2, 2, 0, 0, 0, 0, 0, 0, 0);
        // one pv bus demoted to pq
        let after = SolutionSlicer::new(3, 1, 0, 0, 0, 0, 0, 0, 0);
        assert_eq!(before.total(), 6);
        assert_eq!(after.total(), 7);
    }
}
