//! Network snapshot: the flat array-of-structs data the solvers consume
//!
//! A [`SnapshotData`] is one compiled view of a network at a point in time:
//! per-branch arrays (impedances, tap state, bounds, converter loss
//! coefficients, control setpoints), per-bus arrays (voltage seed, power
//! injection, reactive limits, pv/pq classification), shunt devices, and the
//! [`ControlIndices`] saying which branches participate in which FUBM control.
//!
//! The snapshot is read-mostly during a solve. The exceptions are the
//! per-timestep branch state columns (`tap_module`, `tap_angle`, `beq`),
//! which the solvers write back on terminal return so chained solvers can
//! warm-start from the converged controls.
//!
//! Every branch is the same generalized element: an AC line leaves the tap at
//! `1∠0` with `beq = 0`, a transformer uses the tap module/angle, and a VSC
//! converter additionally carries loss coefficients and appears in
//! [`ControlIndices::i_vsc`].

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{FubmError, FubmResult};
use crate::indices::ControlIndices;

/// Per-branch arrays. All vectors have length `nbr` except the per-timestep
/// state columns, which are `ntime x nbr`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchData {
    /// "from" bus index per branch
    pub f: Vec<usize>,
    /// "to" bus index per branch
    pub t: Vec<usize>,
    /// Series resistance (p.u.)
    pub r: Vec<f64>,
    /// Series reactance (p.u.)
    pub x: Vec<f64>,
    /// Total charging susceptance (p.u., both legs)
    pub b: Vec<f64>,
    /// Converter level constant: 1 for lines/transformers, sqrt(3)/2 for VSC
    pub k2: Vec<f64>,
    /// Fixed (virtual) tap ratio at the "from" side
    pub vtap_f: Vec<f64>,
    /// Fixed (virtual) tap ratio at the "to" side
    pub vtap_t: Vec<f64>,
    /// Base switching-loss conductance per branch (p.u.)
    pub g0sw: Vec<f64>,
    /// IEC 62751-2 loss curve constant term
    pub alpha1: Vec<f64>,
    /// IEC 62751-2 loss curve linear term
    pub alpha2: Vec<f64>,
    /// IEC 62751-2 loss curve quadratic term
    pub alpha3: Vec<f64>,
    /// Droop constant per branch
    pub kdp: Vec<f64>,
    /// Active power flow setpoint at the "from" side (MW)
    pub pf_set: Vec<f64>,
    /// Reactive power flow setpoint at the "from" side (MVAr)
    pub qf_set: Vec<f64>,
    /// Reactive power flow setpoint at the "to" side (MVAr)
    pub qt_set: Vec<f64>,
    /// Droop voltage setpoint at the "from" side (p.u.)
    pub vf_set: Vec<f64>,
    /// Tap module state, one column per timestep
    pub tap_module: Vec<Vec<f64>>,
    /// Tap/shift angle state (rad), one column per timestep
    pub tap_angle: Vec<Vec<f64>>,
    /// Equivalent susceptance state (p.u.), one column per timestep
    pub beq: Vec<Vec<f64>>,
    /// Tap module bounds
    pub tap_module_min: Vec<f64>,
    pub tap_module_max: Vec<f64>,
    /// Tap angle bounds (rad)
    pub tap_angle_min: Vec<f64>,
    pub tap_angle_max: Vec<f64>,
    /// Equivalent susceptance bounds (p.u.)
    pub beq_min: Vec<f64>,
    pub beq_max: Vec<f64>,
}

impl BranchData {
    /// Series admittance `1 / (R + jX)` per branch.
    pub fn series_admittance(&self) -> Vec<Complex64> {
        self.r
            .iter()
            .zip(&self.x)
            .map(|(&r, &x)| Complex64::new(r, x).inv())
            .collect()
    }
}

/// Shunt devices, one entry per device (several may share a bus).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShuntData {
    /// Bus each device connects to
    pub bus: Vec<usize>,
    /// Device admittance (MVA at nominal voltage; scaled by Sbase on use)
    pub admittance: Vec<Complex64>,
    /// In-service flag
    pub active: Vec<bool>,
}

/// One compiled network snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    pub nbus: usize,
    pub nbr: usize,
    pub ntime: usize,
    /// Base power (MVA)
    pub sbase: f64,
    pub branch_data: BranchData,
    pub shunt_data: ShuntData,
    /// Initial complex bus voltages
    pub vbus: Vec<Complex64>,
    /// Specified bus power injections (p.u.)
    pub sbus: Vec<Complex64>,
    /// Lower reactive limit per bus (p.u.)
    pub qmin_bus: Vec<f64>,
    /// Upper reactive limit per bus (p.u.)
    pub qmax_bus: Vec<f64>,
    /// PV bus indices (slack excluded)
    pub pv: Vec<usize>,
    /// PQ bus indices (slack excluded)
    pub pq: Vec<usize>,
    /// Control participation index sets
    pub control: ControlIndices,
}

impl SnapshotData {
    /// Write the terminal branch control state back into timestep `t`.
    ///
    /// Called by the solvers on every terminal return, including the
    /// non-converged restore-and-abort path.
    pub fn set_snapshot_state(&mut self, t: usize, m: &[f64], theta: &[f64], beq: &[f64]) {
        self.branch_data.tap_module[t].copy_from_slice(m);
        self.branch_data.tap_angle[t].copy_from_slice(theta);
        self.branch_data.beq[t].copy_from_slice(beq);
    }

    /// Check internal consistency: index ranges, nonzero impedances,
    /// positive tap modules, disjoint bus partitions.
    pub fn validate(&self) -> FubmResult<()> {
        let bd = &self.branch_data;
        if bd.f.len() != self.nbr || bd.t.len() != self.nbr {
            return Err(FubmError::Validation(format!(
                "branch connectivity arrays have length {}/{}, expected {}",
                bd.f.len(),
                bd.t.len(),
                self.nbr
            )));
        }
        for (k, (&f, &t)) in bd.f.iter().zip(&bd.t).enumerate() {
            if f >= self.nbus || t >= self.nbus {
                return Err(FubmError::Validation(format!(
                    "branch {k} connects buses {f}-{t} outside 0..{}",
                    self.nbus
                )));
            }
            if bd.r[k] == 0.0 && bd.x[k] == 0.0 {
                return Err(FubmError::Validation(format!("branch {k} has zero impedance")));
            }
        }
        for col in &bd.tap_module {
            if let Some(k) = col.iter().position(|&m| m <= 0.0) {
                return Err(FubmError::Validation(format!(
                    "branch {k} has non-positive tap module"
                )));
            }
        }
        for sets in [
            &self.control.i_pfsh,
            &self.control.i_pfdp,
            &self.control.i_qfma,
            &self.control.i_qtma,
            &self.control.i_vtma,
            &self.control.i_beqz,
            &self.control.i_beqv,
            &self.control.i_vsc,
        ] {
            if let Some(&k) = sets.iter().find(|&&k| k >= self.nbr) {
                return Err(FubmError::Validation(format!(
                    "control index {k} outside branch range 0..{}",
                    self.nbr
                )));
            }
        }
        for sets in [&self.control.vf_beq_bus, &self.control.vt_ma_bus] {
            if let Some(&b) = sets.iter().find(|&&b| b >= self.nbus) {
                return Err(FubmError::Validation(format!(
                    "controlled bus {b} outside bus range 0..{}",
                    self.nbus
                )));
            }
        }
        if let Some(b) = self.pv.iter().find(|b| self.pq.contains(b)) {
            return Err(FubmError::Validation(format!(
                "bus {b} is in both pv and pq sets"
            )));
        }
        Ok(())
    }
}

/// Specification of one branch for [`SnapshotBuilder::add_branch`].
#[derive(Debug, Clone)]
pub struct BranchSpec {
    pub f: usize,
    pub t: usize,
    pub r: f64,
    pub x: f64,
    pub b: f64,
    pub k2: f64,
    pub vtap_f: f64,
    pub vtap_t: f64,
    pub tap_module: f64,
    pub tap_angle: f64,
    pub beq: f64,
    pub g0sw: f64,
    pub tap_module_bounds: (f64, f64),
    pub tap_angle_bounds: (f64, f64),
    pub beq_bounds: (f64, f64),
}

impl Default for BranchSpec {
    fn default() -> Self {
        Self {
            f: 0,
            t: 0,
            r: 0.0,
            x: 1e-20,
            b: 0.0,
            k2: 1.0,
            vtap_f: 1.0,
            vtap_t: 1.0,
            tap_module: 1.0,
            tap_angle: 0.0,
            beq: 0.0,
            g0sw: 0.0,
            tap_module_bounds: (0.1, 2.0),
            tap_angle_bounds: (-1.570796, 1.570796),
            beq_bounds: (-999.0, 999.0),
        }
    }
}

/// Incremental snapshot constructor used by callers and tests.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    nbus: usize,
    sbase: f64,
    ntime: usize,
    branch_data: BranchData,
    shunt_data: ShuntData,
    vbus: Vec<Complex64>,
    sbus: Vec<Complex64>,
    qmin_bus: Vec<f64>,
    qmax_bus: Vec<f64>,
    pv: Vec<usize>,
    pq: Vec<usize>,
    control: ControlIndices,
    state_m: Vec<f64>,
    state_theta: Vec<f64>,
    state_beq: Vec<f64>,
}

impl SnapshotBuilder {
    /// Start a snapshot with `nbus` buses at a flat `1∠0` voltage start.
    /// Every non-slack, non-pv bus should be declared pq before `build`.
    pub fn new(nbus: usize, sbase: f64) -> Self {
        Self {
            nbus,
            sbase,
            ntime: 1,
            branch_data: BranchData::default(),
            shunt_data: ShuntData::default(),
            vbus: vec![Complex64::new(1.0, 0.0); nbus],
            sbus: vec![Complex64::new(0.0, 0.0); nbus],
            qmin_bus: vec![f64::NEG_INFINITY; nbus],
            qmax_bus: vec![f64::INFINITY; nbus],
            pv: Vec::new(),
            pq: Vec::new(),
            control: ControlIndices::default(),
            state_m: Vec::new(),
            state_theta: Vec::new(),
            state_beq: Vec::new(),
        }
    }

    /// Set the specified power injection at a bus (p.u.).
    pub fn bus_power(&mut self, bus: usize, s: Complex64) -> &mut Self {
        self.sbus[bus] = s;
        self
    }

    /// Set the initial voltage at a bus.
    pub fn bus_voltage(&mut self, bus: usize, v: Complex64) -> &mut Self {
        self.vbus[bus] = v;
        self
    }

    /// Set per-bus reactive limits (p.u.).
    pub fn q_limits(&mut self, bus: usize, qmin: f64, qmax: f64) -> &mut Self {
        self.qmin_bus[bus] = qmin;
        self.qmax_bus[bus] = qmax;
        self
    }

    /// Declare a voltage-controlled (pv) bus.
    pub fn pv_bus(&mut self, bus: usize) -> &mut Self {
        self.pv.push(bus);
        self
    }

    /// Declare a load (pq) bus.
    pub fn pq_bus(&mut self, bus: usize) -> &mut Self {
        self.pq.push(bus);
        self
    }

    /// Add a branch, returning its index.
    pub fn add_branch(&mut self, spec: BranchSpec) -> usize {
        let bd = &mut self.branch_data;
        bd.f.push(spec.f);
        bd.t.push(spec.t);
        bd.r.push(spec.r);
        bd.x.push(spec.x);
        bd.b.push(spec.b);
        bd.k2.push(spec.k2);
        bd.vtap_f.push(spec.vtap_f);
        bd.vtap_t.push(spec.vtap_t);
        bd.g0sw.push(spec.g0sw);
        bd.alpha1.push(0.0);
        bd.alpha2.push(0.0);
        bd.alpha3.push(0.0);
        bd.kdp.push(0.0);
        bd.pf_set.push(0.0);
        bd.qf_set.push(0.0);
        bd.qt_set.push(0.0);
        bd.vf_set.push(1.0);
        bd.tap_module_min.push(spec.tap_module_bounds.0);
        bd.tap_module_max.push(spec.tap_module_bounds.1);
        bd.tap_angle_min.push(spec.tap_angle_bounds.0);
        bd.tap_angle_max.push(spec.tap_angle_bounds.1);
        bd.beq_min.push(spec.beq_bounds.0);
        bd.beq_max.push(spec.beq_bounds.1);
        self.state_m.push(spec.tap_module);
        self.state_theta.push(spec.tap_angle);
        self.state_beq.push(spec.beq);
        self.state_m.len() - 1
    }

    /// Add a shunt device at a bus (MVA admittance at nominal voltage).
    pub fn add_shunt(&mut self, bus: usize, admittance: Complex64) -> &mut Self {
        self.shunt_data.bus.push(bus);
        self.shunt_data.admittance.push(admittance);
        self.shunt_data.active.push(true);
        self
    }

    /// Mark a branch as a VSC converter with IEC 62751-2 loss coefficients.
    pub fn mark_vsc(&mut self, branch: usize, alpha1: f64, alpha2: f64, alpha3: f64) -> &mut Self {
        self.branch_data.alpha1[branch] = alpha1;
        self.branch_data.alpha2[branch] = alpha2;
        self.branch_data.alpha3[branch] = alpha3;
        self.control.i_vsc.push(branch);
        self
    }

    /// Control active power flow at the "from" side via shift angle.
    pub fn control_pf_shift(&mut self, branch: usize, pf_mw: f64) -> &mut Self {
        self.branch_data.pf_set[branch] = pf_mw;
        self.control.i_pfsh.push(branch);
        self
    }

    /// Droop-control active power flow against the "from"-side voltage.
    pub fn control_pf_droop(&mut self, branch: usize, pf_mw: f64, vm_set: f64, kdp: f64) -> &mut Self {
        self.branch_data.pf_set[branch] = pf_mw;
        self.branch_data.vf_set[branch] = vm_set;
        self.branch_data.kdp[branch] = kdp;
        self.control.i_pfdp.push(branch);
        self
    }

    /// Control reactive power at the "from" side via tap module.
    pub fn control_qf_tap(&mut self, branch: usize, qf_mvar: f64) -> &mut Self {
        self.branch_data.qf_set[branch] = qf_mvar;
        self.control.i_qfma.push(branch);
        self
    }

    /// Control reactive power at the "to" side via tap module.
    pub fn control_qt_tap(&mut self, branch: usize, qt_mvar: f64) -> &mut Self {
        self.branch_data.qt_set[branch] = qt_mvar;
        self.control.i_qtma.push(branch);
        self
    }

    /// Hold the "to"-side bus voltage via the tap module.
    pub fn control_vt_tap(&mut self, branch: usize) -> &mut Self {
        let bus = self.branch_data.t[branch];
        self.control.i_vtma.push(branch);
        self.control.vt_ma_bus.push(bus);
        self
    }

    /// Force Qf to zero via the equivalent susceptance (DC-side constraint).
    pub fn control_zero_qf(&mut self, branch: usize) -> &mut Self {
        self.control.i_beqz.push(branch);
        self
    }

    /// Hold the "from"-side bus voltage via the equivalent susceptance.
    pub fn control_vf_beq(&mut self, branch: usize) -> &mut Self {
        let bus = self.branch_data.f[branch];
        self.control.i_beqv.push(branch);
        self.control.vf_beq_bus.push(bus);
        self
    }

    /// Finish, replicating the branch state across `ntime` columns.
    pub fn build(mut self) -> FubmResult<SnapshotData> {
        let nbr = self.state_m.len();
        self.branch_data.tap_module = vec![self.state_m.clone(); self.ntime];
        self.branch_data.tap_angle = vec![self.state_theta.clone(); self.ntime];
        self.branch_data.beq = vec![self.state_beq.clone(); self.ntime];
        let nc = SnapshotData {
            nbus: self.nbus,
            nbr,
            ntime: self.ntime,
            sbase: self.sbase,
            branch_data: self.branch_data,
            shunt_data: self.shunt_data,
            vbus: self.vbus,
            sbus: self.sbus,
            qmin_bus: self.qmin_bus,
            qmax_bus: self.qmax_bus,
            pv: self.pv,
            pq: self.pq,
            control: self.control,
        };
        nc.validate()?;
        Ok(nc)
    }
}
