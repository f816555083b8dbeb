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

//! Sparse Realization Engine (spec.md §4.4): partition the compressed
//! voxel set into contiguous slices, build each slice's covariance block,
//! factorize it, and draw correlated values from it into the realization.

pub mod cholesky;
pub mod covariance;

pub use cholesky::{DenseCholesky, SparseCholesky};
pub use covariance::{
    apply_sparse_covariance, build_sparse_covariance, cov_eval, get_slice, sqrt_sparse_covariance,
    Slice,
};
