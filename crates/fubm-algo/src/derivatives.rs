//! Analytic partial derivatives of bus injections and branch flows
//!
//! Supplies the sub-matrices the Jacobian assembler slices: `dSbus/dVa`,
//! `dSbus/dVm`, `dSf/dV`, `dSt/dV` over all buses/branches, plus the
//! control-variable derivatives (`tau`, `ma`, `Beq`) whose columns span one
//! combined control index set each.
//!
//! All derivatives treat the switching-loss conductance `Gsw` as frozen at
//! its current value; the loss feedback is handled by recomputation in the
//! outer iteration, not by the Jacobian.

use num_complex::Complex64;
use sprs::{CsMat, TriMat};

use crate::admittance::AdmittanceMatrices;
use fubm_core::SnapshotData;

/// Derivatives of bus injections and branch flows w.r.t. voltage angle and
/// magnitude.
#[derive(Debug, Clone)]
pub struct VoltageDerivatives {
    pub d_sbus_d_va: CsMat<Complex64>,
    pub d_sbus_d_vm: CsMat<Complex64>,
    pub d_sf_d_va: CsMat<Complex64>,
    pub d_sf_d_vm: CsMat<Complex64>,
    pub d_st_d_va: CsMat<Complex64>,
    pub d_st_d_vm: CsMat<Complex64>,
}

/// Derivatives w.r.t. one control variable family, columns keyed by the
/// combined control index set they were built from.
#[derive(Debug, Clone)]
pub struct ControlDerivatives {
    /// nbus x |set|
    pub d_sbus: CsMat<Complex64>,
    /// nbr x |set|
    pub d_sf: CsMat<Complex64>,
    /// nbr x |set|
    pub d_st: CsMat<Complex64>,
}

/// `dSbus/dVa`, `dSbus/dVm`, `dSf/dV`, `dSt/dV` at voltage `v`.
pub fn voltage_derivatives(
    nc: &SnapshotData,
    adm: &AdmittanceMatrices,
    v: &[Complex64],
) -> VoltageDerivatives {
    let nbus = nc.nbus;
    let nbr = nc.nbr;
    let j = Complex64::new(0.0, 1.0);
    let e: Vec<Complex64> = v.iter().map(|x| x / x.norm()).collect();

    // bus currents
    let mut ibus = vec![Complex64::new(0.0, 0.0); nbus];
    for (i, row) in adm.ybus.outer_iterator().enumerate() {
        for (k, &y) in row.iter() {
            ibus[i] += y * v[k];
        }
    }

    let mut dva = TriMat::new((nbus, nbus));
    let mut dvm = TriMat::new((nbus, nbus));
    for (i, row) in adm.ybus.outer_iterator().enumerate() {
        for (k, &y) in row.iter() {
            dva.add_triplet(i, k, -j * v[i] * (y * v[k]).conj());
            dvm.add_triplet(i, k, v[i] * (y * e[k]).conj());
        }
        // diagonal terms from the injected current
        dva.add_triplet(i, i, j * v[i] * ibus[i].conj());
        dvm.add_triplet(i, i, ibus[i].conj() * e[i]);
    }

    let bd = &nc.branch_data;
    let mut sf_dva = TriMat::new((nbr, nbus));
    let mut sf_dvm = TriMat::new((nbr, nbus));
    let mut st_dva = TriMat::new((nbr, nbus));
    let mut st_dvm = TriMat::new((nbr, nbus));
    for k in 0..nbr {
        let f = bd.f[k];
        let t = bd.t[k];
        let i_f = adm.yff[k] * v[f] + adm.yft[k] * v[t];
        let i_t = adm.ytf[k] * v[f] + adm.ytt[k] * v[t];

        let transfer_f = (adm.yft[k] * v[t]).conj();
        sf_dva.add_triplet(k, f, j * v[f] * transfer_f);
        sf_dva.add_triplet(k, t, -j * v[f] * transfer_f);
        sf_dvm.add_triplet(k, f, e[f] * i_f.conj() + v[f] * (adm.yff[k] * e[f]).conj());
        sf_dvm.add_triplet(k, t, v[f] * (adm.yft[k] * e[t]).conj());

        let transfer_t = (adm.ytf[k] * v[f]).conj();
        st_dva.add_triplet(k, t, j * v[t] * transfer_t);
        st_dva.add_triplet(k, f, -j * v[t] * transfer_t);
        st_dvm.add_triplet(k, t, e[t] * i_t.conj() + v[t] * (adm.ytt[k] * e[t]).conj());
        st_dvm.add_triplet(k, f, v[t] * (adm.ytf[k] * e[f]).conj());
    }

    VoltageDerivatives {
        d_sbus_d_va: dva.to_csr(),
        d_sbus_d_vm: dvm.to_csr(),
        d_sf_d_va: sf_dva.to_csr(),
        d_sf_d_vm: sf_dvm.to_csr(),
        d_st_d_va: st_dva.to_csr(),
        d_st_d_vm: st_dvm.to_csr(),
    }
}

/// Derivatives w.r.t. the tap/shift angle for the branches in `idx`
/// (`iPfsh` or `iPfdp`, or their concatenation).
pub fn tau_derivatives(
    nc: &SnapshotData,
    adm: &AdmittanceMatrices,
    v: &[Complex64],
    idx: &[usize],
) -> ControlDerivatives {
    let bd = &nc.branch_data;
    let ys = bd.series_admittance();
    let j = Complex64::new(0.0, 1.0);

    let mut d_sbus = TriMat::new((nc.nbus, idx.len()));
    let mut d_sf = TriMat::new((nc.nbr, idx.len()));
    let mut d_st = TriMat::new((nc.nbr, idx.len()));

    for (k, &i) in idx.iter().enumerate() {
        let f = bd.f[i];
        let t = bd.t[i];
        let yft_dsh = -ys[i] / (-j * bd.k2[i] * adm.tap[i].conj());
        let ytf_dsh = -ys[i] / (j * bd.k2[i] * adm.tap[i]);

        let val_f = v[f] * (yft_dsh * v[t]).conj();
        let val_t = v[t] * (ytf_dsh * v[f]).conj();

        d_sbus.add_triplet(f, k, val_f);
        d_sbus.add_triplet(t, k, val_t);
        d_sf.add_triplet(i, k, val_f);
        d_st.add_triplet(i, k, val_t);
    }

    ControlDerivatives {
        d_sbus: d_sbus.to_csr(),
        d_sf: d_sf.to_csr(),
        d_st: d_st.to_csr(),
    }
}

/// Derivatives w.r.t. the tap module for the branches in `idx`
/// (`iQfma`, `iQtma`, `iVtma`, or their concatenation).
pub fn ma_derivatives(
    nc: &SnapshotData,
    adm: &AdmittanceMatrices,
    v: &[Complex64],
    m: &[f64],
    beq: &[f64],
    idx: &[usize],
) -> ControlDerivatives {
    let bd = &nc.branch_data;
    let ys = bd.series_admittance();

    let mut d_sbus = TriMat::new((nc.nbus, idx.len()));
    let mut d_sf = TriMat::new((nc.nbr, idx.len()));
    let mut d_st = TriMat::new((nc.nbr, idx.len()));

    for (k, &i) in idx.iter().enumerate() {
        let f = bd.f[i];
        let t = bd.t[i];
        let k2 = bd.k2[i];
        let ytt_b = ys[i] + Complex64::new(0.0, bd.b[i] / 2.0 + beq[i]);

        let dyff_dma = -2.0 * ytt_b / (k2 * k2 * m[i] * m[i] * m[i]);
        let dyft_dma = ys[i] / (k2 * m[i] * adm.tap[i].conj());
        let dytf_dma = ys[i] / (k2 * m[i] * adm.tap[i]);

        let val_f = v[f] * (dyff_dma * v[f] + dyft_dma * v[t]).conj();
        let val_t = v[t] * (dytf_dma * v[f]).conj();

        d_sbus.add_triplet(f, k, val_f);
        d_sbus.add_triplet(t, k, val_t);
        d_sf.add_triplet(i, k, val_f);
        d_st.add_triplet(i, k, val_t);
    }

    ControlDerivatives {
        d_sbus: d_sbus.to_csr(),
        d_sf: d_sf.to_csr(),
        d_st: d_st.to_csr(),
    }
}

/// Derivatives w.r.t. the equivalent susceptance for the branches in `idx`
/// (`iBeqz`, `iBeqv`, or their concatenation). Only the "from" side moves.
pub fn beq_derivatives(
    nc: &SnapshotData,
    v: &[Complex64],
    m: &[f64],
    idx: &[usize],
) -> ControlDerivatives {
    let bd = &nc.branch_data;
    let j = Complex64::new(0.0, 1.0);

    let mut d_sbus = TriMat::new((nc.nbus, idx.len()));
    let mut d_sf = TriMat::new((nc.nbr, idx.len()));
    let d_st = TriMat::new((nc.nbr, idx.len()));

    for (k, &i) in idx.iter().enumerate() {
        let f = bd.f[i];
        let km = bd.k2[i] * m[i];
        let dyff_dbeq = j / (km * km);
        let val_f = v[f] * (dyff_dbeq * v[f]).conj();

        d_sbus.add_triplet(f, k, val_f);
        d_sf.add_triplet(i, k, val_f);
    }

    ControlDerivatives {
        d_sbus: d_sbus.to_csr(),
        d_sf: d_sf.to_csr(),
        d_st: d_st.to_csr(),
    }
}
