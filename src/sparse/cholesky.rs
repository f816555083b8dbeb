/*
    Nyx, blazing fast astrodynamics
    Copyright (C) 2018-onwards Christopher Rabotin <christopher.rabotin@gmail.com>

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use nalgebra::{Cholesky, DMatrix};

/// Seam over the lower-triangular factorization used to whiten a slice's
/// covariance block. The real simulator is meant to run against a genuine
/// sparse-banded Cholesky solver (spec.md §4.4); no such crate is available
/// in this workspace, so [`DenseCholesky`] factors the (already banded)
/// block as an ordinary dense matrix via `nalgebra`.
pub trait SparseCholesky {
    /// Attempt to factor a symmetric positive-(semi)definite `cov` into `L`
    /// with `cov = L * L^T`. Returns `None` if `cov` is not PD.
    fn factorize(&self, cov: &DMatrix<f64>) -> Option<DMatrix<f64>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DenseCholesky;

impl SparseCholesky for DenseCholesky {
    fn factorize(&self, cov: &DMatrix<f64>) -> Option<DMatrix<f64>> {
        Cholesky::new(cov.clone()).map(|c| c.l())
    }
}

#[cfg(test)]
mod cholesky_ut {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_identity_factors_to_identity() {
        let n = 4;
        let cov = DMatrix::<f64>::identity(n, n);
        let l = DenseCholesky.factorize(&cov).unwrap();
        assert_eq!(l, DMatrix::identity(n, n));
    }

    #[test]
    fn test_non_pd_matrix_returns_none() {
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(DenseCholesky.factorize(&cov).is_none());
    }

    #[test]
    fn test_reconstructs_original_matrix() {
        let cov = DMatrix::from_row_slice(3, 3, &[4.0, 2.0, 0.0, 2.0, 5.0, 1.0, 0.0, 1.0, 3.0]);
        let l = DenseCholesky.factorize(&cov).unwrap();
        let reconstructed = &l * l.transpose();
        for (a, b) in reconstructed.iter().zip(cov.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
    }
}
