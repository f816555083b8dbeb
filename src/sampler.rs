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

use crate::config::SimConfig;
use crate::errors::{AtmSimError, SamplingExhaustedSnafu};
use crate::rng::CounterStream;

const MAX_DRAWS: usize = 10_000;

/// Wind vector in the scan frame (spec.md §3, `DrawnParams`).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindVector {
    pub wx: f64,
    pub wy: f64,
    pub wz: f64,
}

/// Scalars drawn for one realization, plus their scan-frame derivatives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawnParams {
    pub lmin: f64,
    pub lmax: f64,
    pub w: f64,
    pub wdir: f64,
    pub z0: f64,
    pub t0: f64,
    pub wind: WindVector,
    /// `1 / (2 * z0)`, precomputed for the water-vapor altitude factor.
    pub z0inv: f64,
}

/// Draw `{lmin, lmax, w, wdir, z0, T0}` from independent truncated Gaussians
/// and derive the scan-frame wind vector (spec.md §4.1).
///
/// `az0`/`el0` are the center of the scan (`(azmin+azmax)/2`, `(elmin+elmax)/2`).
pub fn draw_params<R: CounterStream>(
    cfg: &SimConfig,
    az0: f64,
    el0: f64,
    rng: &mut R,
) -> Result<DrawnParams, AtmSimError> {
    let mut randn = vec![0.0; MAX_DRAWS];
    rng.fill_normal(cfg.key1, cfg.key2, cfg.counter1, cfg.counter2, &mut randn);

    let mut irand = 0usize;
    let mut next = || -> Option<f64> {
        if irand >= MAX_DRAWS - 1 {
            None
        } else {
            let v = randn[irand];
            irand += 1;
            Some(v)
        }
    };

    let (mut lmin, mut lmax) = (0.0, 0.0);
    loop {
        lmin = 0.0;
        lmax = 0.0;
        while lmin <= 0.0 {
            lmin = cfg.lmin.center + next().ok_or_else(|| SamplingExhaustedSnafu.build())? * cfg.lmin.sigma;
        }
        while lmax <= 0.0 {
            lmax = cfg.lmax.center + next().ok_or_else(|| SamplingExhaustedSnafu.build())? * cfg.lmax.sigma;
        }
        if lmin < lmax {
            break;
        }
    }

    let mut w = -1.0;
    while w < 0.0 {
        w = cfg.w.center + next().ok_or_else(|| SamplingExhaustedSnafu.build())? * cfg.w.sigma;
    }

    let wdir_raw = cfg.wdir.center + next().ok_or_else(|| SamplingExhaustedSnafu.build())? * cfg.wdir.sigma;
    let wdir = wdir_raw.rem_euclid(std::f64::consts::PI);

    let mut z0 = 0.0;
    while z0 <= 0.0 {
        z0 = cfg.z0.center + next().ok_or_else(|| SamplingExhaustedSnafu.build())? * cfg.z0.sigma;
    }

    let mut t0 = 0.0;
    while t0 <= 0.0 {
        t0 = cfg.t0.center + next().ok_or_else(|| SamplingExhaustedSnafu.build())? * cfg.t0.sigma;
    }

    let z0inv = 1.0 / (2.0 * z0);
    let wind = wind_in_scan_frame(w, wdir, az0, el0);

    debug!(
        "drawn parameters: lmin = {lmin} m, lmax = {lmax} m, w = {w} m/s, wdir = {} deg, z0 = {z0} m, T0 = {t0} K, wind = {wind:?}",
        wdir.to_degrees()
    );

    Ok(DrawnParams {
        lmin,
        lmax,
        w,
        wdir,
        z0,
        t0,
        wind,
        z0inv,
    })
}

/// Rotate the horizontal-frame wind `(w*cos(wdir), w*sin(wdir), 0)` into the
/// scan frame and invert the horizontal components (spec.md §4.1): the
/// simulator advects the telescope through a static atmosphere rather than
/// the atmosphere past the telescope. Per `original_source/.../draw.cpp`,
/// only `wx`/`wy` are negated; `wz` keeps the sign that falls out of the
/// el0 tilt of `wx_h`.
fn wind_in_scan_frame(w: f64, wdir: f64, az0: f64, el0: f64) -> WindVector {
    let eastward = w * wdir.cos();
    let northward = w * wdir.sin();

    let angle = az0 - std::f64::consts::FRAC_PI_2;
    let wx_h = eastward * angle.cos() - northward * angle.sin();
    let wy = eastward * angle.sin() + northward * angle.cos();

    let wx = wx_h * el0.cos();
    let wz = -wx_h * el0.sin();

    WindVector {
        wx: -wx,
        wy: -wy,
        wz,
    }
}

#[cfg(test)]
mod sampler_ut {
    use super::*;
    use crate::config::ScalarPrior;
    use crate::rng::Pcg64CounterStream;

    fn base_cfg() -> SimConfig {
        SimConfig::builder()
            .azmin(0.0)
            .azmax(std::f64::consts::FRAC_PI_2)
            .elmin(std::f64::consts::FRAC_PI_3)
            .elmax(1.2)
            .tmin(0.0)
            .tmax(1.0)
            .key1(0)
            .key2(0)
            .counter1(0)
            .counter2(0)
            .build()
    }

    #[test]
    fn test_no_wind_when_sigma_zero_and_center_zero() {
        let mut cfg = base_cfg();
        cfg.w = ScalarPrior::fixed(0.0);
        let mut rng = Pcg64CounterStream;
        let params = draw_params(&cfg, std::f64::consts::FRAC_PI_4, 1.0, &mut rng).unwrap();
        assert_eq!(params.wind, WindVector::default());
    }

    #[test]
    fn test_lmin_lt_lmax() {
        let cfg = base_cfg();
        let mut rng = Pcg64CounterStream;
        let params = draw_params(&cfg, std::f64::consts::FRAC_PI_4, 1.0, &mut rng).unwrap();
        assert!(params.lmin > 0.0);
        assert!(params.lmax > 0.0);
        assert!(params.lmin < params.lmax);
    }

    #[test]
    fn test_wdir_reduced_mod_pi() {
        let mut cfg = base_cfg();
        cfg.wdir = ScalarPrior::fixed(10.0 * std::f64::consts::PI);
        cfg.wdir.sigma = 0.0;
        let mut rng = Pcg64CounterStream;
        let params = draw_params(&cfg, 0.0, 1.0, &mut rng).unwrap();
        assert!(params.wdir >= 0.0 && params.wdir < std::f64::consts::PI);
    }

    #[test]
    fn test_wind_sign_is_inverted() {
        // With az0 == pi/2 the rotation angle is zero, so wx_h == eastward
        // wind and wz == 0; the telescope-frame wind must be the negative
        // of the physical wind, per spec.md sign-inversion rule.
        let vec = wind_in_scan_frame(10.0, 0.0, std::f64::consts::FRAC_PI_2, 0.0);
        assert!((vec.wx + 10.0).abs() < 1e-9);
    }
}
