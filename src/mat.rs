//! Structured matrices carried by OVF templates
//!
//! Template data is highly structured: identity and diagonal maps for the
//! affine transformation `B`, a few dense rows for the polyhedral set `A`,
//! diagonal Cholesky factors for the quadratic part. This module keeps
//! those shapes explicit instead of expanding everything to general sparse
//! storage, and offers just the access patterns the reformulators use:
//! row/column iteration, transpose-apply, and quadratic-form evaluation.

use crate::error::{Error, Result};

/// A structured sparse matrix
#[derive(Debug, Clone, PartialEq)]
pub enum Mat {
    /// No matrix (treated as absent, not as zero)
    Empty,
    /// `scale * I` of dimension `n`
    Eye {
        /// Dimension
        n: usize,
        /// Scale applied to the identity
        scale: f64,
    },
    /// Diagonal matrix
    Diag(Vec<f64>),
    /// General rows in compressed form
    Csr {
        /// Number of rows
        nrows: usize,
        /// Number of columns
        ncols: usize,
        /// Row start offsets, `nrows + 1` entries
        row_ptr: Vec<usize>,
        /// Column indices per stored entry
        col_idx: Vec<usize>,
        /// Values per stored entry
        vals: Vec<f64>,
    },
}

impl Mat {
    /// Build a CSR matrix from triplets
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Mat> {
        let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nrows];
        for &(i, j, v) in triplets {
            if i >= nrows || j >= ncols {
                return Err(Error::index_out_of_range(format!(
                    "triplet ({i}, {j}) outside a {nrows}x{ncols} matrix"
                )));
            }
            rows[i].push((j, v));
        }
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::new();
        let mut vals = Vec::new();
        row_ptr.push(0);
        for mut row in rows {
            row.sort_by_key(|&(j, _)| j);
            for (j, v) in row {
                col_idx.push(j);
                vals.push(v);
            }
            row_ptr.push(col_idx.len());
        }
        Ok(Mat::Csr {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            vals,
        })
    }

    /// `scale * I` of dimension `n`
    pub fn eye(n: usize, scale: f64) -> Mat {
        Mat::Eye { n, scale }
    }

    /// Diagonal matrix from its diagonal
    pub fn diag(d: Vec<f64>) -> Mat {
        Mat::Diag(d)
    }

    /// True when no matrix is present
    pub fn is_empty(&self) -> bool {
        matches!(self, Mat::Empty)
    }

    /// `(nrows, ncols)`; `(0, 0)` for an absent matrix
    pub fn size(&self) -> (usize, usize) {
        match self {
            Mat::Empty => (0, 0),
            Mat::Eye { n, .. } => (*n, *n),
            Mat::Diag(d) => (d.len(), d.len()),
            Mat::Csr { nrows, ncols, .. } => (*nrows, *ncols),
        }
    }

    /// The stored entries of row `i` as `(col, val)` pairs
    pub fn row(&self, i: usize) -> Vec<(usize, f64)> {
        match self {
            Mat::Empty => Vec::new(),
            Mat::Eye { n, scale } => {
                if i < *n && *scale != 0.0 {
                    vec![(i, *scale)]
                } else {
                    Vec::new()
                }
            }
            Mat::Diag(d) => match d.get(i) {
                Some(&v) if v != 0.0 => vec![(i, v)],
                _ => Vec::new(),
            },
            Mat::Csr {
                row_ptr,
                col_idx,
                vals,
                ..
            } => {
                let (lo, hi) = (row_ptr[i], row_ptr[i + 1]);
                col_idx[lo..hi]
                    .iter()
                    .copied()
                    .zip(vals[lo..hi].iter().copied())
                    .collect()
            }
        }
    }

    /// The stored entries of column `j` as `(row, val)` pairs
    pub fn col(&self, j: usize) -> Vec<(usize, f64)> {
        match self {
            Mat::Empty => Vec::new(),
            Mat::Eye { .. } | Mat::Diag(_) => self.row(j),
            Mat::Csr {
                nrows,
                row_ptr,
                col_idx,
                vals,
                ..
            } => {
                let mut out = Vec::new();
                for i in 0..*nrows {
                    for k in row_ptr[i]..row_ptr[i + 1] {
                        if col_idx[k] == j {
                            out.push((i, vals[k]));
                        }
                    }
                }
                out
            }
        }
    }

    /// `out += A x`
    ///
    /// Errors with `DimensionDifferent` on size mismatch.
    pub fn axpy(&self, x: &[f64], out: &mut [f64]) -> Result<()> {
        let (nrows, ncols) = self.size();
        if self.is_empty() {
            return Ok(());
        }
        if x.len() != ncols {
            return Err(Error::dimension_mismatch(ncols, x.len()));
        }
        if out.len() < nrows {
            return Err(Error::dimension_mismatch(nrows, out.len()));
        }
        for i in 0..nrows {
            for (j, v) in self.row(i) {
                out[i] += v * x[j];
            }
        }
        Ok(())
    }

    /// `out += Aᵀ x`
    pub fn atxpy(&self, x: &[f64], out: &mut [f64]) -> Result<()> {
        let (nrows, ncols) = self.size();
        if self.is_empty() {
            return Ok(());
        }
        if x.len() != nrows {
            return Err(Error::dimension_mismatch(nrows, x.len()));
        }
        if out.len() < ncols {
            return Err(Error::dimension_mismatch(ncols, out.len()));
        }
        for i in 0..nrows {
            for (j, v) in self.row(i) {
                out[j] += v * x[i];
            }
        }
        Ok(())
    }

    /// `xᵀ A x` for a square matrix
    pub fn eval_quad(&self, x: &[f64]) -> Result<f64> {
        let (nrows, ncols) = self.size();
        if self.is_empty() {
            return Ok(0.0);
        }
        if nrows != ncols {
            return Err(Error::dimension_mismatch(nrows, ncols));
        }
        if x.len() != ncols {
            return Err(Error::dimension_mismatch(ncols, x.len()));
        }
        let mut acc = 0.0;
        for i in 0..nrows {
            for (j, v) in self.row(i) {
                acc += x[i] * v * x[j];
            }
        }
        Ok(acc)
    }
}

impl Default for Mat {
    fn default() -> Self {
        Mat::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_eye_rows() {
        let m = Mat::eye(3, 2.0);
        assert_eq!(m.size(), (3, 3));
        assert_eq!(m.row(1), vec![(1, 2.0)]);
        assert_eq!(m.col(2), vec![(2, 2.0)]);
    }

    #[test]
    fn test_csr_roundtrip() {
        let m = Mat::from_triplets(2, 3, &[(0, 2, 5.0), (1, 0, -1.0), (0, 1, 2.0)]).unwrap();
        assert_eq!(m.row(0), vec![(1, 2.0), (2, 5.0)]);
        assert_eq!(m.row(1), vec![(0, -1.0)]);
        assert_eq!(m.col(0), vec![(1, -1.0)]);
    }

    #[test]
    fn test_triplet_out_of_range() {
        assert!(Mat::from_triplets(2, 2, &[(2, 0, 1.0)]).is_err());
    }

    #[test]
    fn test_axpy_atxpy() {
        let m = Mat::from_triplets(2, 3, &[(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0)]).unwrap();
        let x = [1.0, 2.0, 3.0];
        let mut out = [0.0; 2];
        m.axpy(&x, &mut out).unwrap();
        assert_relative_eq!(out[0], 7.0);
        assert_relative_eq!(out[1], 6.0);

        let y = [1.0, 1.0];
        let mut out_t = [0.0; 3];
        m.atxpy(&y, &mut out_t).unwrap();
        assert_eq!(out_t, [1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_eval_quad() {
        let m = Mat::diag(vec![2.0, 4.0]);
        let q = m.eval_quad(&[1.0, 2.0]).unwrap();
        assert_relative_eq!(q, 2.0 + 16.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let m = Mat::eye(2, 1.0);
        let mut out = [0.0; 2];
        assert!(matches!(
            m.axpy(&[1.0, 2.0, 3.0], &mut out),
            Err(Error::DimensionDifferent { .. })
        ));
    }
}
