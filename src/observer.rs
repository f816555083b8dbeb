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

use rayon::prelude::*;

use crate::errors::{AtmSimError, InterpolationOutOfRangeSnafu};
use crate::geometry::VolumeGrid;
use crate::sampler::DrawnParams;
use crate::shared::RealizationStore;

/// Trilinear-interpolation scratch, caching the last voxel looked up so a
/// ray marching through nearby samples can skip recomputing the base index
/// (spec.md §4.5, §9 Re-architecture guidance: "a stack-local cache rather
/// than hidden mutable state on the grid"). One instance per observing
/// thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpCache {
    last_ix: i64,
    last_iy: i64,
    last_iz: i64,
    valid: bool,
}

impl InterpCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trilinearly interpolate the realization at scan-frame point
    /// `(x, y, z)` (spec.md §4.5 `interp`).
    fn interp(
        &mut self,
        grid: &VolumeGrid,
        realization: &RealizationStore,
        x: f64,
        y: f64,
        z: f64,
    ) -> Result<f64, AtmSimError> {
        let fx = (x - grid.xstart) / grid.xstep;
        let fy = (y - grid.ystart) / grid.ystep;
        let fz = (z - grid.zstart) / grid.zstep;

        let ix = fx.floor();
        let iy = fy.floor();
        let iz = fz.floor();

        if ix < 0.0
            || iy < 0.0
            || iz < 0.0
            || ix as i64 >= grid.nx - 1
            || iy as i64 >= grid.ny - 1
            || iz as i64 >= grid.nz - 1
        {
            return InterpolationOutOfRangeSnafu { x, y, z }.fail();
        }

        let (ix, iy, iz) = (ix as i64, iy as i64, iz as i64);
        self.last_ix = ix;
        self.last_iy = iy;
        self.last_iz = iz;
        self.valid = true;

        let wx = fx - ix as f64;
        let wy = fy - iy as f64;
        let wz = fz - iz as f64;

        let base = ix * grid.xstride + iy * grid.ystride + iz * grid.zstride;
        let at = |dx: i64, dy: i64, dz: i64| -> f64 {
            let offset = base + dx * grid.xstride + dy * grid.ystride + dz * grid.zstride;
            realization.get(offset as usize)
        };

        let c00 = at(0, 0, 0) * (1.0 - wx) + at(1, 0, 0) * wx;
        let c01 = at(0, 0, 1) * (1.0 - wx) + at(1, 0, 1) * wx;
        let c10 = at(0, 1, 0) * (1.0 - wx) + at(1, 1, 0) * wx;
        let c11 = at(0, 1, 1) * (1.0 - wx) + at(1, 1, 1) * wx;

        let c0 = c00 * (1.0 - wy) + c10 * wy;
        let c1 = c01 * (1.0 - wy) + c11 * wy;

        Ok(c0 * (1.0 - wz) + c1 * wz)
    }
}

/// Outcome of observing one `(t, az, el)` sample (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObserveOutcome {
    Sample(f64),
    OutOfRange,
}

/// Per-batch observation report (spec.md §6 external interfaces).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchObserveReport {
    pub outcomes: Vec<ObserveOutcome>,
    pub nout_of_range: usize,
}

/// Ray-step a batch of `(t, az, el)` samples through the realization,
/// applying the frozen-wind advection and vertical attenuation (spec.md
/// §4.5 `observe`). Each ray is stepped outward in increments of `xstep`
/// until it leaves `[rmin, rmax]` or climbs above `z_max`; passing
/// `fixed_r > 0` instead evaluates a single point at that range, for
/// calibration. Samples whose az/el fall outside the scan bounds, or whose
/// ray never crosses a simulated voxel, are reported as `OutOfRange` rather
/// than failing the whole batch.
pub fn observe(
    grid: &VolumeGrid,
    params: &DrawnParams,
    realization: &RealizationStore,
    t: &[f64],
    az: &[f64],
    el: &[f64],
    fixed_r: f64,
) -> BatchObserveReport {
    assert_eq!(t.len(), az.len());
    assert_eq!(t.len(), el.len());

    let outcomes: Vec<ObserveOutcome> = (0..t.len())
        .into_par_iter()
        .map(|i| observe_one(grid, params, realization, t[i], az[i], el[i], fixed_r))
        .collect();

    let nout_of_range = outcomes
        .iter()
        .filter(|o| matches!(o, ObserveOutcome::OutOfRange))
        .count();

    BatchObserveReport {
        outcomes,
        nout_of_range,
    }
}

/// Is `az` within `[azmin, azmax]`, allowing for a +/- 2*pi branch-cut shift
/// (spec.md §4.5 step 1)?
fn az_in_bounds(az: f64, azmin: f64, azmax: f64) -> bool {
    let tau = std::f64::consts::TAU;
    [az, az - tau, az + tau]
        .into_iter()
        .any(|a| a >= azmin && a <= azmax)
}

/// Scan-frame coordinates of the point at range `r` along the line of sight
/// `(az, el)`, as seen by a telescope sitting at `(xtel, ytel, ztel)`
/// (spec.md §4.5 step 4): the ray is built relative to the scan center
/// `(az0, el0)` and then rotated by `el0` into the grid's storage frame
/// (the inverse of the scan-to-horizontal rotation used by `ind2coord`).
fn ray_point(
    grid: &VolumeGrid,
    r: f64,
    az: f64,
    el: f64,
    xtel: f64,
    ytel: f64,
    ztel: f64,
) -> (f64, f64, f64) {
    let rx = r * el.cos() * (az - grid.az0).cos();
    let ry = r * el.cos() * (az - grid.az0).sin();
    let rz = r * el.sin();

    let x = rx * grid.cosel0 + rz * grid.sinel0;
    let y = ry;
    let z = -rx * grid.sinel0 + rz * grid.cosel0;

    (x + xtel, y + ytel, z + ztel)
}

fn observe_one(
    grid: &VolumeGrid,
    params: &DrawnParams,
    realization: &RealizationStore,
    t: f64,
    az: f64,
    el: f64,
    fixed_r: f64,
) -> ObserveOutcome {
    if !az_in_bounds(az, grid.azmin, grid.azmax) || el < grid.elmin || el > grid.elmax {
        return ObserveOutcome::OutOfRange;
    }

    let t_rel = t - grid.tmin;
    let xtel = grid.wind.wx * t_rel;
    let ytel = grid.wind.wy * t_rel;
    let ztel = grid.wind.wz * t_rel;

    let mut cache = InterpCache::new();
    let rstep = grid.xstep;
    let mut val = 0.0;
    let mut any_valid = false;

    let eval_at = |r: f64, cache: &mut InterpCache| -> Option<f64> {
        let (x, y, z) = ray_point(grid, r, az, el, xtel, ytel, ztel);
        cache.interp(grid, realization, x, y, z).ok().map(|v| {
            // Vertical temperature-attenuation factor (spec.md §4.5):
            // turbulence closer to the ground couples more strongly
            // into the observed brightness temperature. `z` is the ray
            // point's scan-frame altitude (the same value passed to
            // `interp`), not `r*sin(el)` horizontal-frame altitude.
            let atten = 1.0 - z / grid.z_atm;
            v * atten
        })
    };

    if fixed_r > 0.0 {
        if let Some(v) = eval_at(fixed_r, &mut cache) {
            val += v;
            any_valid = true;
        }
    } else {
        let mut r = grid.rmin.max(1.5 * grid.xstep);
        while r <= grid.rmax && r * grid.elmax.sin() < grid.z_max {
            match eval_at(r, &mut cache) {
                Some(v) => {
                    val += v;
                    any_valid = true;
                }
                None => {
                    if any_valid {
                        break;
                    }
                }
            }
            r += rstep;
        }
    }

    if !any_valid {
        ObserveOutcome::OutOfRange
    } else {
        ObserveOutcome::Sample(val * rstep * params.t0)
    }
}

#[cfg(test)]
mod observer_ut {
    use super::*;
    use crate::config::SimConfig;
    use crate::sampler::WindVector;

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

    fn base_params() -> DrawnParams {
        DrawnParams {
            lmin: 0.01,
            lmax: 10.0,
            w: 0.0,
            wdir: 0.0,
            z0: 2000.0,
            t0: 280.0,
            wind: WindVector::default(),
            z0inv: 1.0 / 4000.0,
        }
    }

    #[test]
    fn test_interp_out_of_range_below_grid() {
        let cfg = base_cfg();
        let grid = VolumeGrid::build(&cfg, WindVector::default(), cfg.rmax);
        let realization = RealizationStore::private_zeroed(grid.nn as usize);
        let mut cache = InterpCache::new();
        let res = cache.interp(&grid, &realization, -1.0e9, 0.0, 0.0);
        assert!(matches!(res, Err(AtmSimError::InterpolationOutOfRange { .. })));
    }

    #[test]
    fn test_interp_at_origin_voxel_is_zero_for_zeroed_realization() {
        let cfg = base_cfg();
        let grid = VolumeGrid::build(&cfg, WindVector::default(), cfg.rmax);
        let realization = RealizationStore::private_zeroed(grid.nn as usize);
        let mut cache = InterpCache::new();
        let v = cache.interp(&grid, &realization, 0.0, 0.0, 50.0).unwrap();
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_observe_reports_out_of_range_when_cone_never_entered() {
        let cfg = base_cfg();
        let grid = VolumeGrid::build(&cfg, WindVector::default(), cfg.rmax);
        let realization = RealizationStore::private_zeroed(grid.nn as usize);
        let params = base_params();
        let report = observe(
            &grid,
            &params,
            &realization,
            &[0.5],
            &[10.0],
            &[10.0],
            grid.xstep,
        );
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.nout_of_range, 1);
        assert_eq!(report.outcomes[0], ObserveOutcome::OutOfRange);
    }

    #[test]
    fn test_observe_in_cone_zeroed_realization_yields_zero_sample() {
        let cfg = base_cfg();
        let grid = VolumeGrid::build(&cfg, WindVector::default(), cfg.rmax);
        let realization = RealizationStore::private_zeroed(grid.nn as usize);
        let params = base_params();
        let report = observe(
            &grid,
            &params,
            &realization,
            &[0.0],
            &[grid.az0],
            &[grid.el0],
            grid.xstep,
        );
        if let ObserveOutcome::Sample(v) = report.outcomes[0] {
            assert_eq!(v, 0.0);
        } else {
            panic!("expected a sample along the boresight, got {:?}", report.outcomes[0]);
        }
    }
}
