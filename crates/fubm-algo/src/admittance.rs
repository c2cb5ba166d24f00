//! Generalized branch admittances
//!
//! Every branch is the same pi model with a complex tap `m·e^{jθ}`, an
//! equivalent susceptance `Beq` and a switching-loss conductance `Gsw` on the
//! "from" side, and fixed virtual taps on both sides. The primitives are:
//!
//! ```text
//! Yff = Gsw + (ys + jB/2 + jBeq + ysh_f) / (m²·vtf²)
//! Yft = -ys / (conj(tap)·vtf·vtt)
//! Ytf = -ys / (tap·vtf·vtt)
//! Ytt = ys + jB/2 + ysh_t / vtt²
//! ```
//!
//! The bus matrix accumulates the primitives branch by branch, which keeps
//! `Ybus`, the branch flows and the bus injections exactly consistent. Bus
//! shunt devices enter through the per-branch `ysh_f`/`ysh_t` terms keyed by
//! the branch terminals, matching how the flow equations see them.
//!
//! Because `m`, `θ`, `Beq` and `Gsw` all change across solver iterations, the
//! whole set is recomputed every time the state moves.

use num_complex::Complex64;
use sprs::{CsMat, TriMat};

use fubm_core::SnapshotData;

/// Admittance primitives and the assembled bus matrix for one branch state.
#[derive(Debug, Clone)]
pub struct AdmittanceMatrices {
    /// Bus admittance matrix (nbus x nbus, CSR)
    pub ybus: CsMat<Complex64>,
    /// "from-from" primitive per branch
    pub yff: Vec<Complex64>,
    /// "from-to" primitive per branch
    pub yft: Vec<Complex64>,
    /// "to-from" primitive per branch
    pub ytf: Vec<Complex64>,
    /// "to-to" primitive per branch
    pub ytt: Vec<Complex64>,
    /// Complex tap `m·e^{jθ}` per branch
    pub tap: Vec<Complex64>,
}

/// Branch power flows and terminal currents at a given voltage.
#[derive(Debug, Clone)]
pub struct BranchFlows {
    /// Complex power entering the branch at the "from" side (p.u.)
    pub sf: Vec<Complex64>,
    /// Complex power entering the branch at the "to" side (p.u.)
    pub st: Vec<Complex64>,
    /// Current at the "to" side (p.u.), used by the converter loss model
    pub it: Vec<Complex64>,
}

impl AdmittanceMatrices {
    /// Compute the primitives and `Ybus` for the given branch control state.
    pub fn compute(nc: &SnapshotData, m: &[f64], theta: &[f64], beq: &[f64], gsw: &[f64]) -> Self {
        let bd = &nc.branch_data;
        let nbr = nc.nbr;

        // per-bus shunt admittance in p.u.
        let mut ysh_bus = vec![Complex64::new(0.0, 0.0); nc.nbus];
        for (k, &bus) in nc.shunt_data.bus.iter().enumerate() {
            if nc.shunt_data.active[k] {
                ysh_bus[bus] += nc.shunt_data.admittance[k] / nc.sbase;
            }
        }

        let ys = bd.series_admittance();
        let mut yff = Vec::with_capacity(nbr);
        let mut yft = Vec::with_capacity(nbr);
        let mut ytf = Vec::with_capacity(nbr);
        let mut ytt = Vec::with_capacity(nbr);
        let mut tap = Vec::with_capacity(nbr);

        for k in 0..nbr {
            let bc2 = Complex64::new(0.0, bd.b[k] / 2.0);
            let jbeq = Complex64::new(0.0, beq[k]);
            let t = Complex64::from_polar(m[k], theta[k]);
            let vtf = bd.vtap_f[k];
            let vtt = bd.vtap_t[k];
            let ysh_f = ysh_bus[bd.f[k]];
            let ysh_t = ysh_bus[bd.t[k]];

            yff.push(gsw[k] + (ys[k] + bc2 + jbeq + ysh_f) / (m[k] * m[k] * vtf * vtf));
            yft.push(-ys[k] / (t.conj() * vtf * vtt));
            ytf.push(-ys[k] / (t * vtf * vtt));
            ytt.push(ys[k] + bc2 + ysh_t / (vtt * vtt));
            tap.push(t);
        }

        let mut tri = TriMat::new((nc.nbus, nc.nbus));
        for k in 0..nbr {
            let f = bd.f[k];
            let t = bd.t[k];
            tri.add_triplet(f, f, yff[k]);
            tri.add_triplet(f, t, yft[k]);
            tri.add_triplet(t, f, ytf[k]);
            tri.add_triplet(t, t, ytt[k]);
        }

        Self {
            ybus: tri.to_csr(),
            yff,
            yft,
            ytf,
            ytt,
            tap,
        }
    }

    /// Branch flows and "to"-side currents at voltage `v`.
    pub fn branch_flows(&self, nc: &SnapshotData, v: &[Complex64]) -> BranchFlows {
        let bd = &nc.branch_data;
        let nbr = nc.nbr;
        let mut sf = Vec::with_capacity(nbr);
        let mut st = Vec::with_capacity(nbr);
        let mut it = Vec::with_capacity(nbr);
        for k in 0..nbr {
            let vf = v[bd.f[k]];
            let vt = v[bd.t[k]];
            let i_f = self.yff[k] * vf + self.yft[k] * vt;
            let i_t = self.ytf[k] * vf + self.ytt[k] * vt;
            sf.push(vf * i_f.conj());
            st.push(vt * i_t.conj());
            it.push(i_t);
        }
        BranchFlows { sf, st, it }
    }

    /// Calculated complex bus injections `Scalc = V · conj(Ybus·V)`.
    pub fn bus_injections(&self, v: &[Complex64]) -> Vec<Complex64> {
        let mut s = vec![Complex64::new(0.0, 0.0); v.len()];
        for (i, row) in self.ybus.outer_iterator().enumerate() {
            let mut ib = Complex64::new(0.0, 0.0);
            for (j, &y) in row.iter() {
                ib += y * v[j];
            }
            s[i] = v[i] * ib.conj();
        }
        s
    }
}
