//! Control index sets and bus-type partitions
//!
//! The FUBM formulation attaches optional control objectives to branches
//! (power-flow control through the shift angle, reactive control through the
//! tap module, voltage or zero-Qf control through the equivalent susceptance,
//! droop control) and to the buses those controls pin. Each objective is
//! represented as a plain index set over the branch or bus arrays; the
//! Jacobian shape and the mismatch vector length both derive from which sets
//! are non-empty.
//!
//! Bus types are kept as an explicit [`BusPartition`]. The partition is
//! immutable: reconciliation and reactive-limit switching both return a fresh
//! partition instead of editing index arrays in place, so cached derived sets
//! (`pvpq`) can never go stale.

use serde::{Deserialize, Serialize};

/// Index sets naming which branches/buses participate in each control type.
///
/// All sets hold indices into the snapshot's branch arrays, except
/// [`vf_beq_bus`](ControlIndices::vf_beq_bus) and
/// [`vt_ma_bus`](ControlIndices::vt_ma_bus) which hold bus indices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlIndices {
    /// Branches controlling active power at the "from" side via shift angle
    pub i_pfsh: Vec<usize>,
    /// Branches with droop-controlled active power flow
    pub i_pfdp: Vec<usize>,
    /// Branches controlling reactive power at the "from" side via tap module
    pub i_qfma: Vec<usize>,
    /// Branches controlling reactive power at the "to" side via tap module
    pub i_qtma: Vec<usize>,
    /// Branches controlling the "to"-side voltage via tap module
    pub i_vtma: Vec<usize>,
    /// Branches forcing Qf to zero via equivalent susceptance
    pub i_beqz: Vec<usize>,
    /// Branches controlling the "from"-side voltage via equivalent susceptance
    pub i_beqv: Vec<usize>,
    /// Buses whose voltage is pinned by a Beq-controlled branch
    pub vf_beq_bus: Vec<usize>,
    /// Buses whose voltage is pinned by a tap-module-controlled branch
    pub vt_ma_bus: Vec<usize>,
    /// Converter branches subject to loss modeling and discrete clamps
    pub i_vsc: Vec<usize>,
}

impl ControlIndices {
    /// Beq column set of the Jacobian: zero-Qf branches then Vf branches.
    pub fn beq_cols(&self) -> Vec<usize> {
        let mut v = self.i_beqz.clone();
        v.extend_from_slice(&self.i_beqv);
        v
    }

    /// Tap-module column set: Qf, then Qt, then Vt controlled branches.
    pub fn ma_cols(&self) -> Vec<usize> {
        let mut v = self.i_qfma.clone();
        v.extend_from_slice(&self.i_qtma);
        v.extend_from_slice(&self.i_vtma);
        v
    }

    /// Shift-angle column set: Pf-controlled then droop-controlled branches.
    pub fn tau_cols(&self) -> Vec<usize> {
        let mut v = self.i_pfsh.clone();
        v.extend_from_slice(&self.i_pfdp);
        v
    }

    /// Buses whose voltage is held by any branch control (sorted, deduplicated).
    pub fn voltage_controlled_buses(&self) -> Vec<usize> {
        let mut v = self.vf_beq_bus.clone();
        v.extend_from_slice(&self.vt_ma_bus);
        v.sort_unstable();
        v.dedup();
        v
    }
}

/// Effective bus-type partition used by the solvers.
///
/// `pvpq` is always `pv` followed by `pq`; both halves are sorted. The
/// partition is rebuilt, never mutated, whenever bus types change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusPartition {
    pv: Vec<usize>,
    pq: Vec<usize>,
    pvpq: Vec<usize>,
}

impl BusPartition {
    /// Build a partition from pv and pq sets. Both are sorted and deduplicated.
    pub fn new(mut pv: Vec<usize>, mut pq: Vec<usize>) -> Self {
        pv.sort_unstable();
        pv.dedup();
        pq.sort_unstable();
        pq.dedup();
        let mut pvpq = pv.clone();
        pvpq.extend_from_slice(&pq);
        Self { pv, pq, pvpq }
    }

    /// Reconcile the stored bus types with the branch voltage controls:
    /// any bus pinned through `vf_beq_bus`/`vt_ma_bus` leaves `pq` and joins
    /// the effective `pv` set, so no bus carries two voltage equations.
    pub fn reconcile(pv: &[usize], pq: &[usize], controlled: &[usize]) -> Self {
        let pq_new: Vec<usize> = pq
            .iter()
            .copied()
            .filter(|b| !controlled.contains(b))
            .collect();
        let mut pv_new = pv.to_vec();
        pv_new.extend_from_slice(controlled);
        Self::new(pv_new, pq_new)
    }

    /// Move the listed pv buses into pq, returning the new partition.
    /// Buses not currently in `pv` are ignored; pq buses never move back.
    pub fn demote_to_pq(&self, demoted: &[usize]) -> Self {
        let pv_new: Vec<usize> = self
            .pv
            .iter()
            .copied()
            .filter(|b| !demoted.contains(b))
            .collect();
        let mut pq_new = self.pq.clone();
        pq_new.extend(demoted.iter().copied().filter(|b| self.pv.contains(b)));
        Self::new(pv_new, pq_new)
    }

    pub fn pv(&self) -> &[usize] {
        &self.pv
    }

    pub fn pq(&self) -> &[usize] {
        &self.pq
    }

    /// pv buses followed by pq buses, in the order the P-balance rows use.
    pub fn pvpq(&self) -> &[usize] {
        &self.pvpq
    }

    pub fn npv(&self) -> usize {
        self.pv.len()
    }

    pub fn npq(&self) -> usize {
        self.pq.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_moves_controlled_buses_to_pv() {
        let part = BusPartition::reconcile(&[1], &[2, 3, 4], &[3]);
        assert_eq!(part.pv(), &[1, 3]);
        assert_eq!(part.pq(), &[2, 4]);
        assert_eq!(part.pvpq(), &[1, 3, 2, 4]);
    }

    #[test]
    fn reconcile_is_disjoint() {
        let part = BusPartition::reconcile(&[1, 3], &[2, 3, 4], &[3, 4]);
        for b in part.pv() {
            assert!(!part.pq().contains(b));
        }
        assert_eq!(part.npv() + part.npq(), part.pvpq().len());
    }

    #[test]
    fn demote_moves_pv_bus_and_keeps_order() {
        let part = BusPartition::new(vec![1, 3, 5], vec![2, 4]);
        let next = part.demote_to_pq(&[3]);
        assert_eq!(next.pv(), &[1, 5]);
        assert_eq!(next.pq(), &[2, 3, 4]);
        // original untouched
        assert_eq!(part.pv(), &[1, 3, 5]);
    }

    #[test]
    fn demote_ignores_non_pv_buses() {
        let part = BusPartition::new(vec![1], vec![2]);
        let next = part.demote_to_pq(&[2, 7]);
        assert_eq!(next.pv(), &[1]);
        assert_eq!(next.pq(), &[2]);
    }

    #[test]
    fn combined_column_sets_preserve_block_order() {
        let idx = ControlIndices {
            i_qfma: vec![0],
            i_qtma: vec![2],
            i_vtma: vec![5],
            ..Default::default()
        };
        assert_eq!(idx.ma_cols(), vec![0, 2, 5]);
    }
}
