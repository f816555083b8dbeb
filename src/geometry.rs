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

use log::debug;
use rayon::prelude::*;

use crate::config::SimConfig;
use crate::coordinator::Coordinator;
use crate::errors::{AtmSimError, EmptyObservationConeSnafu};
use crate::sampler::WindVector;

/// Axis-aligned voxel lattice enclosing the observation cone over the scan
/// (spec.md §3, `VolumeGrid`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeGrid {
    pub xstart: f64,
    pub ystart: f64,
    pub zstart: f64,
    pub delta_x: f64,
    pub delta_y: f64,
    pub delta_z: f64,
    pub xstep: f64,
    pub ystep: f64,
    pub zstep: f64,
    pub nx: i64,
    pub ny: i64,
    pub nz: i64,
    pub nn: i64,
    pub xstride: i64,
    pub ystride: i64,
    pub zstride: i64,
    pub maxdist: f64,

    // Geometry inputs carried along for `in_cone` and the observer.
    pub az0: f64,
    pub el0: f64,
    pub sinel0: f64,
    pub cosel0: f64,
    pub azmin: f64,
    pub azmax: f64,
    pub elmin: f64,
    pub elmax: f64,
    pub delta_az: f64,
    pub delta_t: f64,
    pub wind: WindVector,
    pub z_max: f64,
    pub z_atm: f64,
    pub tmin: f64,
    pub rmin: f64,
    pub rmax: f64,
}

impl VolumeGrid {
    /// Build the bounding volume and voxel grid for the scan (spec.md §4.2).
    #[allow(clippy::too_many_arguments)]
    pub fn build(cfg: &SimConfig, wind: WindVector, rmax_for_zclamp: f64) -> Self {
        let az0 = 0.5 * (cfg.azmin + cfg.azmax);
        let el0 = 0.5 * (cfg.elmin + cfg.elmax);
        let sinel0 = el0.sin();
        let cosel0 = el0.cos();
        let delta_az = cfg.azmax - cfg.azmin;
        let delta_t = cfg.tmax - cfg.tmin;

        // Step 1: clamp zmax by rmax*sin(elmax).
        let zmax_from_rmax = rmax_for_zclamp * cfg.elmax.sin();
        let z_max = cfg.z_max.min(zmax_from_rmax);

        // Step 2: maxdist and cone extent.
        let maxdist = z_max / sinel0;

        let r = maxdist;
        let z_lo = {
            let z = r * cfg.elmin.sin();
            let rproj = r * cfg.elmin.cos();
            let x = rproj * 0.0_f64.cos();
            -x * sinel0 + z * cosel0
        };
        let z_hi = {
            let z = r * cfg.elmax.sin();
            let rproj = r * cfg.elmax.cos();
            let x = rproj * (0.5 * delta_az).cos();
            -x * sinel0 + z * cosel0
        };

        let rproj_min = r * cfg.elmin.cos();
        let delta_y_cone = if delta_az > std::f64::consts::PI {
            2.0 * rproj_min
        } else {
            2.0 * rproj_min * (0.5 * (std::f64::consts::PI - delta_az)).cos()
        };
        let delta_z_cone = z_hi - z_lo;

        let mut delta_x = maxdist;
        let mut delta_y = delta_y_cone;
        let mut delta_z = delta_z_cone;

        // Step 3: wind drift and interpolation margin.
        let wdx = wind.wx.abs() * delta_t;
        let wdy = wind.wy.abs() * delta_t;
        let wdz = wind.wz.abs() * delta_t;

        delta_x += wdx;
        delta_y += wdy;
        delta_z += wdz;

        delta_x += cfg.xstep;
        delta_y += 2.0 * cfg.ystep;
        delta_z += 2.0 * cfg.zstep;

        // Step 4: anchor the origin so the telescope sits at (0,0,0) at t=0.
        let xstart = if wind.wx < 0.0 { -wdx } else { 0.0 };
        let ystart = if wind.wy < 0.0 {
            -0.5 * delta_y_cone - wdy - cfg.ystep
        } else {
            -0.5 * delta_y_cone - cfg.ystep
        };
        let zstart = if wind.wz < 0.0 {
            z_lo - wdz - cfg.zstep
        } else {
            z_lo - cfg.zstep
        };

        // Step 5: voxel counts and strides.
        let nx = (delta_x / cfg.xstep) as i64 + 1;
        let ny = (delta_y / cfg.ystep) as i64 + 1;
        let nz = (delta_z / cfg.zstep) as i64 + 1;
        let nn = nx * ny * nz;

        let zstride = 1;
        let ystride = zstride * nz;
        let xstride = ystride * ny;

        debug!(
            "simulation volume: delta=({delta_x}, {delta_y}, {delta_z}) m, start=({xstart}, {ystart}, {zstart}) m, n=({nx}, {ny}, {nz}), nn={nn}, maxdist={maxdist} m"
        );

        Self {
            xstart,
            ystart,
            zstart,
            delta_x,
            delta_y,
            delta_z,
            xstep: cfg.xstep,
            ystep: cfg.ystep,
            zstep: cfg.zstep,
            nx,
            ny,
            nz,
            nn,
            xstride,
            ystride,
            zstride,
            maxdist,
            az0,
            el0,
            sinel0,
            cosel0,
            azmin: cfg.azmin,
            azmax: cfg.azmax,
            elmin: cfg.elmin,
            elmax: cfg.elmax,
            delta_az,
            delta_t,
            wind,
            z_max,
            z_atm: cfg.z_atm,
            tmin: cfg.tmin,
            rmin: cfg.rmin,
            rmax: cfg.rmax,
        }
    }

    /// Geometry test: is the voxel `(x, y, z)` (scan frame) inside the
    /// observation cone at any time in `[0, delta_t]` (or, if `t_in` is
    /// given, at that single instant)? (spec.md §4.2 `in_cone`.)
    pub fn in_cone(&self, x: f64, y: f64, z: f64, t_in: Option<f64>) -> bool {
        let tstep = 1.0_f64;
        let mut t = 0.0_f64;
        loop {
            let t_eval = match t_in {
                Some(fixed) => fixed,
                None => {
                    if self.delta_t - t < tstep {
                        self.delta_t
                    } else {
                        t
                    }
                }
            };

            let dx = x - self.wind.wx * t_eval;
            let dy = y - self.wind.wy * t_eval;
            let mut dz = z - self.wind.wz * t_eval;

            if dx + self.xstep >= 0.0 {
                let r = (dx * dx + dy * dy + dz * dz).sqrt();
                if r <= 1.01 * self.maxdist {
                    if dz > 0.0 {
                        dz -= self.zstep;
                    } else {
                        dz += self.zstep;
                    }

                    if dy.abs() < 2.0 * self.ystep && dz.abs() < 2.0 * self.zstep {
                        return true;
                    }

                    let dzz = dx * self.sinel0 + dz * self.cosel0;

                    let el = (dzz / r).asin();
                    if el >= self.elmin && el <= self.elmax {
                        let dxx2 = (dx + self.xstep) * self.cosel0 - dz * self.sinel0;
                        let az = dy.atan2(dxx2);
                        if az.abs() <= 0.5 * self.delta_az {
                            return true;
                        }
                    }
                }
            }

            if t_in.is_some() || self.delta_t - t < tstep {
                break;
            }
            t += tstep;
        }
        false
    }

    /// Decompose a full (dense) voxel index into `(ix, iy, iz)`.
    pub fn decompose(&self, ifull: i64) -> (i64, i64, i64) {
        let ix = ifull / self.xstride;
        let rem = ifull - ix * self.xstride;
        let iy = rem / self.ystride;
        let iz = rem - iy * self.ystride;
        (ix, iy, iz)
    }

    /// Scan-frame coordinates of the voxel `(ix, iy, iz)`.
    pub fn voxel_coords(&self, ix: i64, iy: i64, iz: i64) -> (f64, f64, f64) {
        (
            self.xstart + ix as f64 * self.xstep,
            self.ystart + iy as f64 * self.ystep,
            self.zstart + iz as f64 * self.zstep,
        )
    }
}

/// Bijection between the full (dense) voxel index set and the compact set
/// of voxels actually touched by the observation cone (spec.md §3,
/// `CompressedIndex`).
#[derive(Clone, Debug, PartialEq)]
pub struct CompressedIndex {
    /// `full_index[0..nelem) -> [0..nn)`, strictly increasing.
    pub full_index: Vec<i64>,
    /// `compressed_index[0..nn) -> [0..nelem) U {-1}`.
    pub compressed_index: Vec<i64>,
}

impl CompressedIndex {
    pub fn nelem(&self) -> usize {
        self.full_index.len()
    }
}

/// Flag cone-hit voxels, dilate by the interpolation halo, and assign
/// compressed indices (spec.md §4.2 `compress_volume`).
pub fn compress_volume<C: Coordinator>(
    grid: &VolumeGrid,
    coordinator: &C,
) -> Result<CompressedIndex, AtmSimError> {
    let nn = grid.nn as usize;
    debug!("compressing volume, N = {nn}");

    let mut hit = vec![false; nn];

    let rank = coordinator.rank();
    let ntask = coordinator.ntask();

    let rows: Vec<(i64, Vec<bool>)> = (0..grid.nx - 1)
        .into_par_iter()
        .filter(|ix| (*ix as usize) % ntask == rank)
        .map(|ix| {
            let x = grid.xstart + ix as f64 * grid.xstep;
            let mut row = vec![false; (grid.ny * grid.nz) as usize];
            for iy in 0..grid.ny - 1 {
                let y = grid.ystart + iy as f64 * grid.ystep;
                for iz in 0..grid.nz - 1 {
                    let z = grid.zstart + iz as f64 * grid.zstep;
                    if grid.in_cone(x, y, z, None) {
                        row[(iy * grid.nz + iz) as usize] = true;
                    }
                }
            }
            (ix, row)
        })
        .collect();

    for (ix, row) in rows {
        for iy in 0..grid.ny - 1 {
            for iz in 0..grid.nz - 1 {
                if row[(iy * grid.nz + iz) as usize] {
                    let offset = ix * grid.xstride + iy * grid.ystride + iz * grid.zstride;
                    hit[offset as usize] = true;
                }
            }
        }
    }

    coordinator.all_reduce_or(&mut hit);

    debug!("flagged hits, flagging neighbors");

    // Dilate the hit set by the interpolation halo {-2..3}^3.
    let hit2 = hit.clone();
    for ix in 1..grid.nx - 1 {
        if (ix as usize) % ntask != rank {
            continue;
        }
        for iy in 1..grid.ny - 1 {
            for iz in 1..grid.nz - 1 {
                let offset = ix * grid.xstride + iy * grid.ystride + iz * grid.zstride;
                if !hit2[offset as usize] {
                    continue;
                }
                for xmul in -2..4_i64 {
                    let jx = ix + xmul;
                    if jx < 0 || jx > grid.nx - 1 {
                        continue;
                    }
                    for ymul in -2..4_i64 {
                        let jy = iy + ymul;
                        if jy < 0 || jy > grid.ny - 1 {
                            continue;
                        }
                        for zmul in -2..4_i64 {
                            let jz = iz + zmul;
                            if jz < 0 || jz > grid.nz - 1 {
                                continue;
                            }
                            let joff = jx * grid.xstride + jy * grid.ystride + jz * grid.zstride;
                            hit[joff as usize] = true;
                        }
                    }
                }
            }
        }
    }

    coordinator.all_reduce_or(&mut hit);

    debug!("creating compression table");

    let mut full_index = Vec::new();
    let mut compressed_index = vec![-1_i64; nn];
    for ifull in 0..nn {
        if hit[ifull] {
            compressed_index[ifull] = full_index.len() as i64;
            full_index.push(ifull as i64);
        }
    }

    let nelem = full_index.len();
    debug!(
        "{nelem} / {nn} ({:.2}%) volume elements needed",
        100.0 * nelem as f64 / nn as f64
    );

    if nelem == 0 {
        return EmptyObservationConeSnafu.fail();
    }

    Ok(CompressedIndex {
        full_index,
        compressed_index,
    })
}
