//! Block-sparse FUBM Jacobian assembly
//!
//! The Jacobian's shape depends on which control sets are active. Assembly
//! is table driven: a fixed list of row blocks (mirroring the residual order
//! of [`crate::mismatch`]) crossed with a fixed list of column groups, where
//! a column group contributes only if its index set is non-empty. Each
//! sub-block is sliced out of the analytic derivative matrices and the grid
//! is stacked into one sparse matrix.
//!
//! The assembled matrix must come out square. A row/column mismatch means
//! the control index sets are inconsistent (for instance a Vf-controlling
//! branch without its pinned bus); that is a configuration error and is
//! raised before any factorization is attempted.

use num_complex::Complex64;
use sprs::{CsMat, TriMat};

use crate::admittance::AdmittanceMatrices;
use crate::derivatives::{
    beq_derivatives, ma_derivatives, tau_derivatives, voltage_derivatives, ControlDerivatives,
    VoltageDerivatives,
};
use crate::mismatch::reactive_rows;
use crate::sparse::{slice_part, slice_rows_part, stack_blocks, Part};
use fubm_core::{BusPartition, FubmError, FubmResult, SnapshotData};

/// Column groups of the Jacobian, in construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnGroup {
    /// Voltage angles at pv and pq buses
    Va,
    /// Voltage magnitudes at pq buses
    Vm,
    /// Equivalent susceptances, zero-Qf then Vf-controlling branches
    Beq,
    /// Tap modules, Qf then Qt then Vt-controlling branches
    Ma,
    /// Shift angles, Pf then droop-controlled branches
    Theta,
}

/// Which derivative family a row block is sliced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowSource {
    /// Bus injection derivatives (`dSbus/dX`)
    Bus,
    /// "from"-side flow derivatives (`dSf/dX`)
    FromFlow,
    /// "to"-side flow derivatives (`dSt/dX`)
    ToFlow,
}

struct RowBlock {
    source: RowSource,
    rows: Vec<usize>,
    part: Part,
    /// droop rows get the extra `Kdp` term on the Vm columns
    droop: bool,
}

/// Assemble the square FUBM Jacobian at the given state.
pub fn build_fubm_jacobian(
    nc: &SnapshotData,
    adm: &AdmittanceMatrices,
    v: &[Complex64],
    m: &[f64],
    beq: &[f64],
    part: &BusPartition,
) -> FubmResult<CsMat<f64>> {
    let ctrl = &nc.control;
    let vd = voltage_derivatives(nc, adm, v);

    let beq_set = ctrl.beq_cols();
    let ma_set = ctrl.ma_cols();
    let tau_set = ctrl.tau_cols();
    let db = beq_derivatives(nc, v, m, &beq_set);
    let dm = ma_derivatives(nc, adm, v, m, beq, &ma_set);
    let dt = tau_derivatives(nc, adm, v, &tau_set);

    let va_cols = part.pvpq().to_vec();
    let vm_cols = part.pq().to_vec();

    let mut columns = vec![ColumnGroup::Va, ColumnGroup::Vm];
    if !beq_set.is_empty() {
        columns.push(ColumnGroup::Beq);
    }
    if !ma_set.is_empty() {
        columns.push(ColumnGroup::Ma);
    }
    if !tau_set.is_empty() {
        columns.push(ColumnGroup::Theta);
    }

    let row_blocks = [
        RowBlock { source: RowSource::Bus, rows: part.pvpq().to_vec(), part: Part::Real, droop: false },
        RowBlock { source: RowSource::Bus, rows: reactive_rows(nc, part), part: Part::Imag, droop: false },
        RowBlock { source: RowSource::FromFlow, rows: ctrl.i_pfdp.clone(), part: Part::NegReal, droop: true },
        RowBlock { source: RowSource::FromFlow, rows: ctrl.i_qfma.clone(), part: Part::Imag, droop: false },
        RowBlock { source: RowSource::FromFlow, rows: ctrl.i_beqz.clone(), part: Part::Imag, droop: false },
        RowBlock { source: RowSource::FromFlow, rows: ctrl.i_pfsh.clone(), part: Part::Real, droop: false },
        RowBlock { source: RowSource::ToFlow, rows: ctrl.i_qtma.clone(), part: Part::Imag, droop: false },
    ];

    let nrows: usize = row_blocks.iter().map(|r| r.rows.len()).sum();
    let ncols: usize = columns
        .iter()
        .map(|c| match c {
            ColumnGroup::Va => va_cols.len(),
            ColumnGroup::Vm => vm_cols.len(),
            ColumnGroup::Beq => beq_set.len(),
            ColumnGroup::Ma => ma_set.len(),
            ColumnGroup::Theta => tau_set.len(),
        })
        .sum();
    if nrows != ncols {
        return Err(FubmError::NonSquareJacobian { rows: nrows, cols: ncols });
    }

    let mut grid: Vec<Vec<CsMat<f64>>> = Vec::with_capacity(row_blocks.len());
    for rb in &row_blocks {
        let mut row = Vec::with_capacity(columns.len());
        for col in &columns {
            let block = sub_block(rb, col, &vd, &db, &dm, &dt, &va_cols, &vm_cols);
            let block = if rb.droop && *col == ColumnGroup::Vm {
                let corr = droop_vm_term(nc, &rb.rows, &vm_cols);
                &block + &corr
            } else {
                block
            };
            row.push(block);
        }
        grid.push(row);
    }

    stack_blocks(&grid)
}

fn sub_block(
    rb: &RowBlock,
    col: &ColumnGroup,
    vd: &VoltageDerivatives,
    db: &ControlDerivatives,
    dm: &ControlDerivatives,
    dt: &ControlDerivatives,
    va_cols: &[usize],
    vm_cols: &[usize],
) -> CsMat<f64> {
    let (dva, dvm, dctrl_b, dctrl_m, dctrl_t) = match rb.source {
        RowSource::Bus => (&vd.d_sbus_d_va, &vd.d_sbus_d_vm, &db.d_sbus, &dm.d_sbus, &dt.d_sbus),
        RowSource::FromFlow => (&vd.d_sf_d_va, &vd.d_sf_d_vm, &db.d_sf, &dm.d_sf, &dt.d_sf),
        RowSource::ToFlow => (&vd.d_st_d_va, &vd.d_st_d_vm, &db.d_st, &dm.d_st, &dt.d_st),
    };
    match col {
        ColumnGroup::Va => slice_part(dva, &rb.rows, va_cols, rb.part),
        ColumnGroup::Vm => slice_part(dvm, &rb.rows, vm_cols, rb.part),
        ColumnGroup::Beq => slice_rows_part(dctrl_b, &rb.rows, rb.part),
        ColumnGroup::Ma => slice_rows_part(dctrl_m, &rb.rows, rb.part),
        ColumnGroup::Theta => slice_rows_part(dctrl_t, &rb.rows, rb.part),
    }
}

/// `Kdp` partial of the droop residual w.r.t. the "from"-bus magnitude.
fn droop_vm_term(nc: &SnapshotData, droop_rows: &[usize], vm_cols: &[usize]) -> CsMat<f64> {
    let bd = &nc.branch_data;
    let mut tri = TriMat::new((droop_rows.len(), vm_cols.len()));
    for (r, &i) in droop_rows.iter().enumerate() {
        if let Some(c) = vm_cols.iter().position(|&b| b == bd.f[i]) {
            tri.add_triplet(r, c, bd.kdp[i]);
        }
    }
    tri.to_csr()
}
