//! End-to-end solver scenarios on small hybrid AC/DC networks

use num_complex::Complex64;

use crate::admittance::{AdmittanceMatrices, BranchFlows};
use crate::controls::ReactivePowerControlMode;
use crate::levenberg::LevenbergMarquardtAcDc;
use crate::newton::NewtonRaphsonAcDc;
use fubm_core::{BranchSpec, FubmError, PowerFlowResults, SnapshotBuilder, SnapshotData};

/// Branch flows at the solver's terminal point, recomputed from the result.
/// Only valid for cases without loss-curve converters (`gsw = g0sw`).
fn terminal_flows(nc: &SnapshotData, res: &PowerFlowResults) -> BranchFlows {
    let adm = AdmittanceMatrices::compute(
        nc,
        &res.tap_module,
        &res.tap_angle,
        &res.beq,
        &nc.branch_data.g0sw,
    );
    adm.branch_flows(nc, &res.voltage)
}

/// slack - pv - pq - pq ring with AC lines only
fn four_bus_ac() -> SnapshotData {
    let mut b = SnapshotBuilder::new(4, 100.0);
    b.pv_bus(1).pq_bus(2).pq_bus(3);
    b.bus_voltage(1, Complex64::new(1.02, 0.0));
    b.bus_power(1, Complex64::new(0.3, 0.0));
    b.bus_power(2, Complex64::new(-0.4, -0.15));
    b.bus_power(3, Complex64::new(-0.2, -0.1));
    b.add_branch(BranchSpec { f: 0, t: 1, r: 0.01, x: 0.06, ..Default::default() });
    b.add_branch(BranchSpec { f: 1, t: 2, r: 0.02, x: 0.1, ..Default::default() });
    b.add_branch(BranchSpec { f: 2, t: 3, r: 0.02, x: 0.1, ..Default::default() });
    b.add_branch(BranchSpec { f: 0, t: 3, r: 0.01, x: 0.08, ..Default::default() });
    b.build().unwrap()
}

/// slack - line - AC bus - converter corridor: a VSC with zero-Qf and Pf
/// control in parallel with an AC line.
///
/// The parallel line keeps the corridor meshed: a converter feeding its "to"
/// bus radially has linearly dependent flow and balance rows at a zero-current
/// flat start, which makes the first Jacobian singular.
fn vsc_link() -> SnapshotData {
    let mut b = SnapshotBuilder::new(3, 100.0);
    b.pq_bus(1).pq_bus(2);
    b.bus_power(2, Complex64::new(-0.3, 0.0));
    b.add_branch(BranchSpec { f: 0, t: 1, r: 0.01, x: 0.08, ..Default::default() });
    let vsc = b.add_branch(BranchSpec { f: 1, t: 2, r: 0.001, x: 0.05, ..Default::default() });
    b.add_branch(BranchSpec { f: 1, t: 2, r: 0.02, x: 0.12, ..Default::default() });
    b.mark_vsc(vsc, 0.0, 0.0, 0.0)
        .control_zero_qf(vsc)
        .control_pf_shift(vsc, 25.0);
    b.build().unwrap()
}

#[test]
fn ac_ring_power_balance_holds_at_load_buses() {
    let mut nc = four_bus_ac();
    let v0 = nc.vbus.clone();
    let s0 = nc.sbus.clone();
    let res = NewtonRaphsonAcDc::new().solve(&mut nc, &v0, &s0).unwrap();
    assert!(res.converged, "residual norm {}", res.norm_f);
    for b in [2, 3] {
        assert!(
            (res.s_calc[b] - s0[b]).norm() < 1e-5,
            "bus {b} injection {} vs target {}",
            res.s_calc[b],
            s0[b]
        );
    }
    // pv bus holds its magnitude, active power matches its target
    assert!((res.voltage_magnitude()[1] - 1.02).abs() < 1e-12);
    assert!((res.s_calc[1].re - 0.3).abs() < 1e-5);
}

#[test]
fn vsc_controls_reach_their_setpoints() {
    let mut nc = vsc_link();
    let v0 = nc.vbus.clone();
    let s0 = nc.sbus.clone();
    let res = NewtonRaphsonAcDc::new().solve(&mut nc, &v0, &s0).unwrap();
    assert!(res.converged, "residual norm {}", res.norm_f);
    let flows = terminal_flows(&nc, &res);
    // zero-Qf via Beq and 25 MW via the shift angle, both on the converter
    assert!(flows.sf[1].im.abs() < 1e-5);
    assert!((flows.sf[1].re - 0.25).abs() < 1e-5);
    // both controls actually moved off their seeds
    assert!(res.beq[1].abs() > 1e-6);
    assert!(res.tap_angle[1].abs() > 1e-6);
    // and stayed inside the branch bounds
    assert!(res.beq[1] >= nc.branch_data.beq_min[1] && res.beq[1] <= nc.branch_data.beq_max[1]);
    assert!(
        res.tap_angle[1] >= nc.branch_data.tap_angle_min[1]
            && res.tap_angle[1] <= nc.branch_data.tap_angle_max[1]
    );
}

#[test]
fn droop_balances_flow_against_terminal_voltage() {
    let mut b = SnapshotBuilder::new(3, 100.0);
    b.pq_bus(1).pq_bus(2);
    b.bus_power(2, Complex64::new(-0.2, -0.05));
    b.add_branch(BranchSpec { f: 0, t: 1, r: 0.01, x: 0.08, ..Default::default() });
    let vsc = b.add_branch(BranchSpec { f: 1, t: 2, r: 0.001, x: 0.05, ..Default::default() });
    b.add_branch(BranchSpec { f: 1, t: 2, r: 0.02, x: 0.12, ..Default::default() });
    b.mark_vsc(vsc, 0.0, 0.0, 0.0).control_pf_droop(vsc, 15.0, 1.0, 0.4);
    let mut nc = b.build().unwrap();
    let v0 = nc.vbus.clone();
    let s0 = nc.sbus.clone();
    let res = NewtonRaphsonAcDc::new().solve(&mut nc, &v0, &s0).unwrap();
    assert!(res.converged, "residual norm {}", res.norm_f);
    let flows = terminal_flows(&nc, &res);
    let vm_f = res.voltage_magnitude()[1];
    let residual = -flows.sf[vsc].re + 0.15 + 0.4 * (vm_f - 1.0);
    assert!(residual.abs() < 1e-5);
}

#[test]
fn tap_module_holds_the_to_side_voltage() {
    let mut b = SnapshotBuilder::new(2, 100.0);
    b.pq_bus(1);
    b.bus_power(1, Complex64::new(-0.25, -0.1));
    let tr = b.add_branch(BranchSpec { f: 0, t: 1, r: 0.005, x: 0.08, ..Default::default() });
    b.control_vt_tap(tr);
    let mut nc = b.build().unwrap();
    let v0 = nc.vbus.clone();
    let s0 = nc.sbus.clone();
    let res = NewtonRaphsonAcDc::new().solve(&mut nc, &v0, &s0).unwrap();
    assert!(res.converged, "residual norm {}", res.norm_f);
    // the controlled bus keeps its seed magnitude while the tap does the work
    assert!((res.voltage_magnitude()[1] - 1.0).abs() < 1e-12);
    assert!((res.tap_module[tr] - 1.0).abs() > 1e-4);
    // the load is still served
    assert!((res.s_calc[1] - s0[1]).norm() < 1e-5);
}

#[test]
fn direct_q_control_pins_the_violated_limit() {
    let mut nc = four_bus_ac();
    // tighten the pv bus band so its reactive support hits the ceiling
    nc.qmax_bus[1] = 0.05;
    nc.qmin_bus[1] = -0.05;
    // push the pv setpoint up to force reactive export
    nc.vbus[1] = Complex64::new(1.05, 0.0);
    let v0 = nc.vbus.clone();
    let s0 = nc.sbus.clone();
    let res = NewtonRaphsonAcDc::new()
        .with_q_control(ReactivePowerControlMode::Direct)
        .solve(&mut nc, &v0, &s0)
        .unwrap();
    assert!(res.converged, "residual norm {}", res.norm_f);
    // the bus now behaves as a load bus at the pinned limit
    assert!((res.s_calc[1].im - 0.05).abs() < 1e-5);
    assert!(res.voltage_magnitude()[1] < 1.05);
}

#[test]
fn no_control_mode_ignores_reactive_limits() {
    let mut nc = four_bus_ac();
    nc.qmax_bus[1] = 0.05;
    nc.vbus[1] = Complex64::new(1.05, 0.0);
    let v0 = nc.vbus.clone();
    let s0 = nc.sbus.clone();
    let res = NewtonRaphsonAcDc::new().solve(&mut nc, &v0, &s0).unwrap();
    assert!(res.converged);
    // the limit is reported in the results but not enforced
    assert!((res.voltage_magnitude()[1] - 1.05).abs() < 1e-12);
    assert!(res.s_calc[1].im > 0.05);
}

#[test]
fn newton_and_levenberg_marquardt_agree() {
    let mut nc1 = four_bus_ac();
    let mut nc2 = four_bus_ac();
    let v0 = nc1.vbus.clone();
    let s0 = nc1.sbus.clone();
    let nr = NewtonRaphsonAcDc::new().solve(&mut nc1, &v0, &s0).unwrap();
    let lm = LevenbergMarquardtAcDc::new().solve(&mut nc2, &v0, &s0).unwrap();
    assert!(nr.converged && lm.converged);
    for (a, b) in nr.voltage.iter().zip(&lm.voltage) {
        assert!((a - b).norm() < 1e-4, "voltages diverge: {a} vs {b}");
    }
}

#[test]
fn repeated_solves_are_bit_identical() {
    let run = || {
        let mut nc = vsc_link();
        let v0 = nc.vbus.clone();
        let s0 = nc.sbus.clone();
        NewtonRaphsonAcDc::new().solve(&mut nc, &v0, &s0).unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.iterations, b.iterations);
    assert_eq!(a.voltage, b.voltage);
    assert_eq!(a.tap_module, b.tap_module);
    assert_eq!(a.tap_angle, b.tap_angle);
    assert_eq!(a.beq, b.beq);
}

#[test]
fn inconsistent_controls_surface_before_factorization() {
    let mut nc = vsc_link();
    // a Vf-controlling branch without its pinned bus makes the system
    // non-square
    nc.control.i_beqv.push(1);
    let v0 = nc.vbus.clone();
    let s0 = nc.sbus.clone();
    let err = NewtonRaphsonAcDc::new().solve(&mut nc, &v0, &s0).unwrap_err();
    assert!(matches!(err, FubmError::NonSquareJacobian { .. }));
}

#[test]
fn radial_converter_flat_start_degrades_to_non_converged() {
    // with zero branch currents the from- and to-side flow sensitivities are
    // exact negations, so a radially fed Pf-controlled converter makes the
    // first Jacobian singular; the solver must keep the seed state and
    // report non-convergence rather than fail
    let mut b = SnapshotBuilder::new(3, 100.0);
    b.pq_bus(1).pq_bus(2);
    b.bus_power(2, Complex64::new(-0.3, 0.0));
    b.add_branch(BranchSpec { f: 0, t: 1, r: 0.01, x: 0.08, ..Default::default() });
    let vsc = b.add_branch(BranchSpec { f: 1, t: 2, r: 0.001, x: 0.05, ..Default::default() });
    b.mark_vsc(vsc, 0.0, 0.0, 0.0)
        .control_zero_qf(vsc)
        .control_pf_shift(vsc, 25.0);
    let mut nc = b.build().unwrap();
    let v0 = nc.vbus.clone();
    let s0 = nc.sbus.clone();
    let res = NewtonRaphsonAcDc::new().solve(&mut nc, &v0, &s0).unwrap();
    assert!(!res.converged);
    assert!(res.norm_f > 1e-2);
    // the terminal state is still written back on the abort path
    assert_eq!(nc.branch_data.tap_angle[0], res.tap_angle);
    assert_eq!(nc.branch_data.beq[0], res.beq);
}

#[test]
fn converter_losses_shift_the_balance() {
    // same link, once lossless and once with a loss curve; the slack must
    // cover the extra dissipation
    let build = |alpha1: f64| {
        let mut b = SnapshotBuilder::new(3, 100.0);
        b.pq_bus(1).pq_bus(2);
        b.bus_power(2, Complex64::new(-0.3, 0.0));
        b.add_branch(BranchSpec { f: 0, t: 1, r: 0.01, x: 0.08, ..Default::default() });
        let vsc = b.add_branch(BranchSpec { f: 1, t: 2, r: 0.001, x: 0.05, ..Default::default() });
        b.mark_vsc(vsc, alpha1, 0.0, 0.0).control_zero_qf(vsc);
        b.build().unwrap()
    };
    let solve = |mut nc: SnapshotData| {
        let v0 = nc.vbus.clone();
        let s0 = nc.sbus.clone();
        NewtonRaphsonAcDc::new().solve(&mut nc, &v0, &s0).unwrap()
    };
    let lossless = solve(build(0.0));
    let lossy = solve(build(0.005));
    assert!(lossless.converged && lossy.converged);
    assert!(lossy.s_calc[0].re > lossless.s_calc[0].re + 1e-4);
}
