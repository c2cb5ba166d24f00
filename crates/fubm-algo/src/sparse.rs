//! Sparse matrix utilities for Jacobian assembly
//!
//! The FUBM Jacobian is assembled from sub-blocks sliced out of larger
//! complex derivative matrices. This module provides the slicing (select
//! rows/columns and take the real or imaginary part) and the block stacker
//! that concatenates the sub-blocks into one square real matrix, plus the
//! direct linear solve shared by both solvers.

use faer::prelude::SpSolver;
use faer::{FaerMat, Mat};
use num_complex::Complex64;
use sprs::{CsMat, TriMat};

use fubm_core::{FubmError, FubmResult};

/// Which part of a complex matrix a slice extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Part {
    Real,
    Imag,
    /// Negated real part, used by the droop control rows
    NegReal,
}

impl Part {
    fn apply(self, v: Complex64) -> f64 {
        match self {
            Part::Real => v.re,
            Part::Imag => v.im,
            Part::NegReal => -v.re,
        }
    }
}

/// Slice `rows x cols` out of a complex CSR matrix, taking one real part.
///
/// `rows` and `cols` are index lists into the source matrix; the result has
/// shape `(rows.len(), cols.len())` with the selected entries re-indexed.
pub fn slice_part(m: &CsMat<Complex64>, rows: &[usize], cols: &[usize], part: Part) -> CsMat<f64> {
    let mut col_pos = vec![usize::MAX; m.cols()];
    for (new_j, &j) in cols.iter().enumerate() {
        col_pos[j] = new_j;
    }

    let mut tri = TriMat::new((rows.len(), cols.len()));
    for (new_i, &i) in rows.iter().enumerate() {
        if let Some(row) = m.outer_view(i) {
            for (j, &v) in row.iter() {
                let new_j = col_pos[j];
                if new_j != usize::MAX {
                    let x = part.apply(v);
                    if x != 0.0 {
                        tri.add_triplet(new_i, new_j, x);
                    }
                }
            }
        }
    }
    tri.to_csr()
}

/// Slice whole rows out of a complex CSR matrix, taking one real part.
/// Used for the control-derivative matrices whose columns already span
/// exactly one control set.
pub fn slice_rows_part(m: &CsMat<Complex64>, rows: &[usize], part: Part) -> CsMat<f64> {
    let all_cols: Vec<usize> = (0..m.cols()).collect();
    slice_part(m, rows, &all_cols, part)
}

/// Block-row stacker: concatenates a grid of sparse sub-blocks into one
/// sparse matrix. Every block row must have the same block count, block
/// heights must agree within a row and block widths within a column.
pub fn stack_blocks(grid: &[Vec<CsMat<f64>>]) -> FubmResult<CsMat<f64>> {
    if grid.is_empty() || grid[0].is_empty() {
        return Ok(CsMat::zero((0, 0)));
    }
    let ncols_blocks = grid[0].len();
    for (bi, row) in grid.iter().enumerate() {
        if row.len() != ncols_blocks {
            return Err(FubmError::ShapeMismatch(format!(
                "block row {bi} has {} blocks, expected {ncols_blocks}",
                row.len()
            )));
        }
        for (bj, block) in row.iter().enumerate() {
            if block.rows() != row[0].rows() {
                return Err(FubmError::ShapeMismatch(format!(
                    "block ({bi},{bj}) has {} rows, expected {}",
                    block.rows(),
                    row[0].rows()
                )));
            }
            if block.cols() != grid[0][bj].cols() {
                return Err(FubmError::ShapeMismatch(format!(
                    "block ({bi},{bj}) has {} cols, expected {}",
                    block.cols(),
                    grid[0][bj].cols()
                )));
            }
        }
    }

    let total_rows: usize = grid.iter().map(|r| r[0].rows()).sum();
    let total_cols: usize = grid[0].iter().map(|b| b.cols()).sum();

    let mut tri = TriMat::new((total_rows, total_cols));
    let mut row_off = 0;
    for row in grid {
        let mut col_off = 0;
        for block in row {
            for (i, brow) in block.outer_iterator().enumerate() {
                for (j, &v) in brow.iter() {
                    tri.add_triplet(row_off + i, col_off + j, v);
                }
            }
            col_off += block.cols();
        }
        row_off += row[0].rows();
    }
    Ok(tri.to_csr())
}

/// Sparse matrix times dense vector.
pub fn mul_vec(m: &CsMat<f64>, v: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; m.rows()];
    for (i, row) in m.outer_iterator().enumerate() {
        let mut acc = 0.0;
        for (j, &x) in row.iter() {
            acc += x * v[j];
        }
        out[i] = acc;
    }
    out
}

/// Direct solve of `A x = b` through faer's LU with partial pivoting.
///
/// The Jacobians here are small and dense-ish once assembled, so a dense
/// factorization is both simpler and fast enough. A non-finite solution is
/// reported as a singular system; the solvers treat that as fatal.
pub fn solve_linear_system(a: &CsMat<f64>, b: &[f64], context: &'static str) -> FubmResult<Vec<f64>> {
    let n = b.len();
    if n == 0 {
        return Ok(vec![]);
    }
    if a.rows() != n || a.cols() != n {
        return Err(FubmError::ShapeMismatch(format!(
            "linear system is {}x{} with rhs of length {n}",
            a.rows(),
            a.cols()
        )));
    }

    let mut mat = Mat::zeros(n, n);
    for (i, row) in a.outer_iterator().enumerate() {
        for (j, &v) in row.iter() {
            mat.write(i, j, v);
        }
    }

    let mut rhs = Mat::zeros(n, 1);
    for (i, &v) in b.iter().enumerate() {
        rhs.write(i, 0, v);
    }

    let lu = mat.partial_piv_lu();
    let solution = lu.solve(&rhs);
    let x: Vec<f64> = (0..n).map(|i| solution.read(i, 0)).collect();

    if x.iter().any(|v| !v.is_finite()) {
        return Err(FubmError::SingularSystem(context));
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csr_from_dense(d: &[&[f64]]) -> CsMat<f64> {
        let mut tri = TriMat::new((d.len(), d[0].len()));
        for (i, row) in d.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    tri.add_triplet(i, j, v);
                }
            }
        }
        tri.to_csr()
    }

    fn cx_csr(d: &[&[Complex64]]) -> CsMat<Complex64> {
        let mut tri = TriMat::new((d.len(), d[0].len()));
        for (i, row) in d.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v != Complex64::new(0.0, 0.0) {
                    tri.add_triplet(i, j, v);
                }
            }
        }
        tri.to_csr()
    }

    #[test]
    fn slice_selects_and_reindexes() {
        let c = |re, im| Complex64::new(re, im);
        let m = cx_csr(&[
            &[c(1.0, 10.0), c(2.0, 20.0), c(3.0, 30.0)],
            &[c(4.0, 40.0), c(5.0, 50.0), c(6.0, 60.0)],
            &[c(7.0, 70.0), c(8.0, 80.0), c(9.0, 90.0)],
        ]);
        let s = slice_part(&m, &[2, 0], &[1], Part::Imag);
        assert_eq!(s.rows(), 2);
        assert_eq!(s.cols(), 1);
        assert_eq!(*s.get(0, 0).unwrap(), 80.0);
        assert_eq!(*s.get(1, 0).unwrap(), 20.0);

        let neg = slice_part(&m, &[0], &[0, 2], Part::NegReal);
        assert_eq!(*neg.get(0, 0).unwrap(), -1.0);
        assert_eq!(*neg.get(0, 1).unwrap(), -3.0);
    }

    #[test]
    fn stack_concatenates_in_block_order() {
        let a = csr_from_dense(&[&[1.0, 2.0]]);
        let b = csr_from_dense(&[&[3.0]]);
        let c = csr_from_dense(&[&[4.0, 5.0], &[6.0, 7.0]]);
        let d = csr_from_dense(&[&[8.0], &[9.0]]);
        let m = stack_blocks(&[vec![a, b], vec![c, d]]).unwrap();
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 3);
        assert_eq!(*m.get(0, 2).unwrap(), 3.0);
        assert_eq!(*m.get(2, 1).unwrap(), 7.0);
        assert_eq!(*m.get(2, 2).unwrap(), 9.0);
    }

    #[test]
    fn stack_rejects_inconsistent_shapes() {
        let a = csr_from_dense(&[&[1.0, 2.0]]);
        let b = csr_from_dense(&[&[3.0], &[4.0]]);
        assert!(matches!(
            stack_blocks(&[vec![a, b]]),
            Err(FubmError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn lu_solve_tridiagonal() {
        let a = csr_from_dense(&[&[4.0, 1.0, 0.0], &[1.0, 4.0, 1.0], &[0.0, 1.0, 4.0]]);
        let b = vec![1.0, 2.0, 1.0];
        let x = solve_linear_system(&a, &b, "test").unwrap();
        let back = mul_vec(&a, &x);
        for i in 0..3 {
            assert!((back[i] - b[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn singular_system_is_reported() {
        let a = csr_from_dense(&[&[1.0, 1.0], &[1.0, 1.0]]);
        let r = solve_linear_system(&a, &[1.0, 2.0], "test");
        assert!(matches!(r, Err(FubmError::SingularSystem(_))));
    }

    #[test]
    fn matvec_follows_the_sparsity_pattern() {
        let a = csr_from_dense(&[&[1.0, 0.0, 2.0], &[0.0, 3.0, 0.0]]);
        assert_eq!(mul_vec(&a, &[1.0, 1.0, 1.0]), vec![3.0, 3.0]);
        assert_eq!(mul_vec(&a, &[0.0, 2.0, 1.0]), vec![2.0, 6.0]);
    }
}
