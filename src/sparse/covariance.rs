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

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::errors::{AtmSimError, FactorizationFailureSnafu};
use crate::geometry::{CompressedIndex, VolumeGrid};
use crate::kolmogorov::KolmogorovTable;
use crate::rng::CounterStream;
use crate::shared::RealizationStore;
use crate::sparse::cholesky::SparseCholesky;

/// Number of band-retry attempts in [`sqrt_sparse_covariance`] (spec.md
/// §4.4: four attempts, narrowing the retained band each time).
const NTRY: i64 = 4;

/// A contiguous run of compressed indices simulated as one covariance
/// block (spec.md §4.4, `get_slice`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slice {
    pub start: usize,
    pub len: usize,
}

/// Partition `[0, nelem)` into slices of whole X-layers, each no smaller
/// than `nelem_sim_max` once started (spec.md §4.4 `get_slice`, and the
/// §3 invariant that a slice is "a contiguous range of compressed indices
/// covering complete X-layers"). Starting from the previous `ind_stop`,
/// `ind_stop` is advanced one X-layer (all compressed indices sharing
/// `ix = full_index[i] / xstride`) at a time until the slice has grown to
/// at least `nelem_sim_max` elements or no layers remain, so a layer is
/// never split across two slices.
pub fn get_slice(idx: &CompressedIndex, xstride: i64, nelem_sim_max: usize) -> Vec<Slice> {
    let nelem = idx.nelem();
    if nelem == 0 {
        return Vec::new();
    }
    let max = nelem_sim_max.max(1);
    let mut slices = Vec::new();
    let mut start = 0;
    while start < nelem {
        let mut stop = start;
        let mut ix_layer = idx.full_index[stop] / xstride;
        while stop - start < max && stop < nelem {
            while stop < nelem && idx.full_index[stop] / xstride == ix_layer {
                stop += 1;
            }
            if stop < nelem {
                ix_layer = idx.full_index[stop] / xstride;
            }
        }
        slices.push(Slice {
            start,
            len: stop - start,
        });
        start = stop;
    }
    slices
}

/// Covariance between two voxels, identified by their full (dense) index,
/// from their Euclidean separation in the scan frame and a water-vapor
/// altitude factor (spec.md §4.4 `cov_eval`): `exp(-(z1+z2)*z0inv) * rho(r)`,
/// zero beyond the Kolmogorov correlation length.
pub fn cov_eval(
    grid: &VolumeGrid,
    kolmo: &KolmogorovTable,
    z0inv: f64,
    ia: i64,
    ib: i64,
) -> Result<f64, AtmSimError> {
    let (xa, ya, za) = {
        let (ix, iy, iz) = grid.decompose(ia);
        grid.voxel_coords(ix, iy, iz)
    };
    if ia == ib {
        return Ok((-2.0 * za * z0inv).exp() * kolmo.kolmogorov(0.0)?);
    }
    let (xb, yb, zb) = {
        let (ix, iy, iz) = grid.decompose(ib);
        grid.voxel_coords(ix, iy, iz)
    };
    let dx = xa - xb;
    let dy = ya - yb;
    let dz = za - zb;
    let r = (dx * dx + dy * dy + dz * dz).sqrt();
    if r > kolmo.rcorr {
        return Ok(0.0);
    }
    Ok((-(za + zb) * z0inv).exp() * kolmo.kolmogorov(r)?)
}

/// Assemble the dense covariance block for one slice (spec.md §4.4
/// `build_sparse_covariance`): off-diagonal entries that would round to
/// negligible fill (`val^2 <= 1e-6 * diag[icol] * diag[irow]`) are dropped
/// to zero, and the diagonal is pre-multiplied by 1.01 to nudge the block
/// toward positive definiteness.
pub fn build_sparse_covariance(
    grid: &VolumeGrid,
    idx: &CompressedIndex,
    kolmo: &KolmogorovTable,
    z0inv: f64,
    slice: Slice,
) -> Result<DMatrix<f64>, AtmSimError> {
    let n = slice.len;
    let mut cov = DMatrix::<f64>::zeros(n, n);
    let mut diag = vec![0.0; n];
    for (i, d) in diag.iter_mut().enumerate() {
        let fa = idx.full_index[slice.start + i];
        *d = cov_eval(grid, kolmo, z0inv, fa, fa)?;
    }
    for i in 0..n {
        let fa = idx.full_index[slice.start + i];
        cov[(i, i)] = 1.01 * diag[i];
        for j in (i + 1)..n {
            let fb = idx.full_index[slice.start + j];
            let c = cov_eval(grid, kolmo, z0inv, fa, fb)?;
            if c * c > 1e-6 * diag[i] * diag[j] {
                cov[(i, j)] = c;
                cov[(j, i)] = c;
            }
        }
    }
    Ok(cov)
}

/// Zero every entry of `cov` farther than `halfwidth` from the diagonal.
fn band_limit(cov: &DMatrix<f64>, halfwidth: i64) -> DMatrix<f64> {
    let n = cov.nrows();
    let mut banded = cov.clone();
    for i in 0..n {
        for j in 0..n {
            if (i as i64 - j as i64).abs() > halfwidth {
                banded[(i, j)] = 0.0;
            }
        }
    }
    banded
}

/// Factorize a slice's covariance block, retrying with a progressively
/// narrower band if the full block is not positive-definite (spec.md
/// §4.4 `sqrt_sparse_covariance`): `ndiag_k = max(3, nelem*(ntry-k)/ntry)`.
pub fn sqrt_sparse_covariance<S: SparseCholesky>(
    cov: &DMatrix<f64>,
    solver: &S,
) -> Result<DMatrix<f64>, AtmSimError> {
    let nelem = cov.nrows() as i64;
    for k in 0..NTRY {
        let ndiag_k = (nelem * (NTRY - k) / NTRY).max(3);
        let attempt = if ndiag_k >= nelem {
            cov.clone()
        } else {
            band_limit(cov, ndiag_k)
        };
        if let Some(l) = solver.factorize(&attempt) {
            if k > 0 {
                warn!("sparse covariance factorization succeeded only after narrowing band to {ndiag_k} (retry {k})");
            }
            return Ok(l);
        }
    }
    FactorizationFailureSnafu.fail()
}

/// Draw a slice's correlated realization values and write them into the
/// shared realization store (spec.md §4.4 `apply_sparse_covariance`):
/// `y = L z` for fresh unit normals `z`, then subtract the slice mean so
/// each block carries zero mean before slices are stitched together.
pub fn apply_sparse_covariance<R: CounterStream>(
    l: &DMatrix<f64>,
    full_indices: &[i64],
    rng: &mut R,
    key1: u64,
    key2: u64,
    counter1: u64,
    counter2: u64,
    realization: &mut RealizationStore,
) -> Result<(), AtmSimError> {
    let n = l.nrows();
    debug!("applying sparse covariance to slice of {n} elements, counter2 = {counter2}");

    let mut z = vec![0.0; n];
    rng.fill_normal(key1, key2, counter1, counter2, &mut z);
    let z = DVector::from_vec(z);

    let y = l * z;
    let mean = y.mean();

    for (i, &full) in full_indices.iter().enumerate() {
        realization.set(full as usize, y[i] - mean);
    }
    Ok(())
}

#[cfg(test)]
mod covariance_ut {
    use super::*;
    use crate::config::SimConfig;
    use crate::coordinator::SingleProcess;
    use crate::rng::Pcg64CounterStream;
    use crate::sampler::WindVector;
    use crate::sparse::cholesky::DenseCholesky;

    fn base_cfg() -> SimConfig {
        SimConfig::builder()
            .azmin(0.0)
            .azmax(std::f64::consts::FRAC_PI_2)
            .elmin(std::f64::consts::FRAC_PI_3)
            .elmax(1.2)
            .tmin(0.0)
            .tmax(1.0)
            .xstep(100.0)
            .ystep(100.0)
            .zstep(100.0)
            .key1(0)
            .key2(0)
            .counter1(0)
            .counter2(0)
            .build()
    }

    #[test]
    fn test_get_slice_partitions_fully_without_overlap_loss() {
        // xstride = 3 groups full indices 0..10 into x-layers of sizes
        // [3, 3, 3, 1] (ix = 0, 0, 0, 1, 1, 1, 2, 2, 2, 3).
        let idx = CompressedIndex {
            full_index: (0..10).collect(),
            compressed_index: (0..10).collect(),
        };
        let slices = get_slice(&idx, 3, 4);
        let total: usize = slices.iter().map(|s| s.len).sum();
        assert_eq!(total, 10);
        // nelem_sim_max=4 forces each slice to swallow whole layers until
        // it reaches 4, never splitting a layer: [layer0+layer1]=6,
        // [layer2+layer3]=4.
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0], Slice { start: 0, len: 6 });
        assert_eq!(slices[1], Slice { start: 6, len: 4 });
    }

    #[test]
    fn test_get_slice_never_splits_an_x_layer() {
        // Every compressed index in this set shares the same x-layer
        // (xstride = 100, all full indices < 100), so a single slice must
        // contain all of them even though nelem_sim_max is tiny.
        let idx = CompressedIndex {
            full_index: vec![0, 1, 2, 3, 4],
            compressed_index: vec![],
        };
        let slices = get_slice(&idx, 100, 2);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0], Slice { start: 0, len: 5 });
    }

    #[test]
    fn test_get_slice_empty_index_yields_no_slices() {
        let idx = CompressedIndex {
            full_index: vec![],
            compressed_index: vec![],
        };
        assert!(get_slice(&idx, 100, 100).is_empty());
    }

    #[test]
    fn test_cov_eval_self_matches_altitude_factor() {
        let cfg = base_cfg();
        let grid = VolumeGrid::build(&cfg, WindVector::default(), cfg.rmax);
        let kolmo = KolmogorovTable::build(0.01, 10.0, grid.delta_x, grid.delta_y, grid.delta_z, &SingleProcess);
        let z0inv = 1.0 / (2.0 * 2000.0);
        let c = cov_eval(&grid, &kolmo, z0inv, 0, 0).unwrap();
        let (_, _, z) = grid.voxel_coords(0, 0, 0);
        let expected = (-2.0 * z * z0inv).exp();
        assert!((c - expected).abs() < 1e-9);
    }

    #[test]
    fn test_cov_eval_beyond_rcorr_is_zero() {
        let cfg = base_cfg();
        let grid = VolumeGrid::build(&cfg, WindVector::default(), cfg.rmax);
        let kolmo = KolmogorovTable::build(0.01, 10.0, grid.delta_x, grid.delta_y, grid.delta_z, &SingleProcess);
        // The opposite corner of a grid this size is far beyond rcorr.
        let far = grid.nn - 1;
        let c = cov_eval(&grid, &kolmo, 1.0 / 4000.0, 0, far).unwrap();
        assert_eq!(c, 0.0);
    }

    #[test]
    fn test_build_sparse_covariance_is_symmetric_with_nudged_diagonal() {
        let cfg = base_cfg();
        let grid = VolumeGrid::build(&cfg, WindVector::default(), cfg.rmax);
        let kolmo = KolmogorovTable::build(0.01, 10.0, grid.delta_x, grid.delta_y, grid.delta_z, &SingleProcess);
        let z0inv = 1.0 / (2.0 * 2000.0);
        let idx = CompressedIndex {
            full_index: vec![0, 1, grid.zstride, grid.ystride],
            compressed_index: vec![],
        };
        let cov =
            build_sparse_covariance(&grid, &idx, &kolmo, z0inv, Slice { start: 0, len: 4 }).unwrap();
        for i in 0..4 {
            let fa = idx.full_index[i];
            let bare = cov_eval(&grid, &kolmo, z0inv, fa, fa).unwrap();
            assert!((cov[(i, i)] - 1.01 * bare).abs() < 1e-9);
            for j in 0..4 {
                assert!((cov[(i, j)] - cov[(j, i)]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_sqrt_sparse_covariance_on_identity_succeeds_first_try() {
        let cov = DMatrix::<f64>::identity(5, 5);
        let l = sqrt_sparse_covariance(&cov, &DenseCholesky).unwrap();
        assert_eq!(l, DMatrix::identity(5, 5));
    }

    #[test]
    fn test_sqrt_sparse_covariance_fails_gracefully_on_hopeless_matrix() {
        // A matrix whose off-diagonal magnitude exceeds the diagonal even
        // once banded to a half-width of 3 remains indefinite.
        let n = 6;
        let mut cov = DMatrix::<f64>::from_element(n, n, -5.0);
        for i in 0..n {
            cov[(i, i)] = 1.0;
        }
        let res = sqrt_sparse_covariance(&cov, &DenseCholesky);
        assert!(matches!(res, Err(AtmSimError::FactorizationFailure)));
    }

    #[test]
    fn test_apply_sparse_covariance_writes_zero_mean_slice() {
        let l = DMatrix::<f64>::identity(4, 4);
        let mut rng = Pcg64CounterStream;
        let mut store = RealizationStore::private_zeroed(10);
        let full_indices = [0_i64, 2, 4, 6];
        apply_sparse_covariance(&l, &full_indices, &mut rng, 1, 2, 3, 4, &mut store).unwrap();
        let written: Vec<f64> = full_indices.iter().map(|&i| store.get(i as usize)).collect();
        let mean: f64 = written.iter().sum::<f64>() / written.len() as f64;
        assert!(mean.abs() < 1e-9);
    }
}
