//! Converter switching-loss model
//!
//! VSC converters dissipate power in their semiconductor switches roughly as
//! a quadratic function of the converted current (IEC 62751-2 correction
//! curve). The loss is represented as a shunt conductance on the "from" side
//! of the converter branch, which makes it part of the admittance model and
//! therefore of the Jacobian implicitly. Because the loss depends on the
//! current, which depends on the voltages, `Gsw` must be refreshed every time
//! the state moves.

use num_complex::Complex64;

use fubm_core::SnapshotData;

/// Switching-loss conductance per branch; zero outside the converter set.
///
/// For each converter branch `i`: `Ivsc = |It[i]|`,
/// `PLoss = α3·Ivsc² + α2·Ivsc + α1`, `Gsw = PLoss / |V[F[i]]|²`.
pub fn switching_loss_conductance(nc: &SnapshotData, v: &[Complex64], it: &[Complex64]) -> Vec<f64> {
    let bd = &nc.branch_data;
    let mut gsw = bd.g0sw.clone();
    for &i in &nc.control.i_vsc {
        let ivsc = it[i].norm();
        let p_loss = bd.alpha3[i] * ivsc * ivsc + bd.alpha2[i] * ivsc + bd.alpha1[i];
        let vf = v[bd.f[i]].norm();
        gsw[i] = p_loss / (vf * vf);
    }
    gsw
}
