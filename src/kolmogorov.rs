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

use crate::coordinator::Coordinator;
use crate::errors::{AtmSimError, RadialOutOfGridSnafu};

/// Fixed threshold below which the autocovariance is treated as zero
/// (spec.md §4.3).
const CORRLIM: f64 = 1e-3;

/// Tabulated isotropic spatial autocovariance of the modified Kolmogorov
/// turbulence model (spec.md §3, `KolmogorovTable`).
#[derive(Clone, Debug, PartialEq)]
pub struct KolmogorovTable {
    pub kolmo_x: Vec<f64>,
    pub kolmo_y: Vec<f64>,
    pub rmin_kolmo: f64,
    pub rmax_kolmo: f64,
    pub rcorr: f64,
    pub rcorrsq: f64,
}

impl KolmogorovTable {
    /// Numerically integrate the modified Kolmogorov power spectrum into
    /// the tabulated autocovariance (spec.md §4.3).
    pub fn build<C: Coordinator>(
        lmin: f64,
        lmax: f64,
        delta_x: f64,
        delta_y: f64,
        delta_z: f64,
        coordinator: &C,
    ) -> Self {
        let rmin_kolmo = 0.0;
        let diag = (delta_x * delta_x + delta_y * delta_y).sqrt();
        let rmax_kolmo = (diag * diag + delta_z * delta_z).sqrt() * 1.01;

        let nr: usize = 1000;
        let tau = 10.0_f64;
        let nri = 1.0 / (nr as f64 - 1.0);
        let enorm = 1.0 / (tau.exp() - 1.0);

        let mut kolmo_x = vec![0.0; nr];
        for (ir, x) in kolmo_x.iter_mut().enumerate() {
            *x = rmin_kolmo + ((ir as f64 * nri * tau).exp() - 1.0) * enorm * (rmax_kolmo - rmin_kolmo);
        }

        let kappamin = 1.0 / lmax;
        let kappamax = 1.0 / lmin;
        let kappal = 0.9 * kappamax;
        let invkappal = 1.0 / kappal;
        let kappa0 = 0.75 * kappamin;
        let kappa0sq = kappa0 * kappa0;

        debug!(
            "evaluating Kolmogorov correlation at {nr} separations in [{rmin_kolmo}, {rmax_kolmo}] m, kappamin = {kappamin}, kappamax = {kappamax}"
        );

        let nkappa: usize = 100_000;
        let upper_limit = 10.0 * kappamax;
        let kappastep = upper_limit / (nkappa as f64 - 1.0);

        let phi = |kappa: f64| -> f64 {
            let kkl = kappa * invkappal;
            (1.0 + 1.802 * kkl - 0.254 * kkl.powf(7.0 / 6.0)) * (-kkl * kkl).exp()
                * (kappa * kappa + kappa0sq).powf(-11.0 / 6.0)
        };

        // Partition the kappa range across peers (spec.md §4.3: "In the
        // parallel variant, partition the kappa range across peers,
        // sum-reduce per-r partial integrals, then normalize locally").
        let ntask = coordinator.ntask();
        let rank = coordinator.rank();
        let chunk = nkappa / ntask + 1;
        let first_kappa = (chunk * rank).min(nkappa.saturating_sub(1));
        let last_kappa = (first_kappa + chunk).min(nkappa.saturating_sub(1));

        let mut kolmo_y: Vec<f64> = kolmo_x
            .par_iter()
            .map(|&r| {
                let mut val = 0.0;
                if first_kappa < last_kappa {
                    // The 3-D isotropic transform is (1/r) * integral of
                    // Phi(kappa) * kappa * sin(kappa*r) dkappa. For
                    // r*kappamax small, sin(kappa*r)/r cancels catastrophically
                    // against its own magnitude, so the integrand is expanded
                    // as kappa*sin(kappa*r)/r -> kappa^2 - kappa^4*r^2/6
                    // instead (the r=0 case, kolmo_y[0], always takes this
                    // branch and reduces to the plain integral of Phi*kappa^2).
                    let small_r = r * kappamax < 1e-2;
                    for ikappa in first_kappa..last_kappa {
                        let kappa_k = ikappa as f64 * kappastep;
                        let kappa_k1 = (ikappa + 1) as f64 * kappastep;
                        let phi_k = phi(kappa_k);
                        let phi_k1 = phi(kappa_k1);

                        let (f_k, f_k1) = if small_r {
                            let series = |k: f64| k * k - k.powi(4) * r * r / 6.0;
                            (phi_k * series(kappa_k), phi_k1 * series(kappa_k1))
                        } else {
                            (
                                phi_k * kappa_k * (kappa_k * r).sin(),
                                phi_k1 * kappa_k1 * (kappa_k1 * r).sin(),
                            )
                        };
                        val += 0.5 * (f_k + f_k1) * kappastep;
                    }
                    if !small_r {
                        val /= r;
                    }
                }
                val
            })
            .collect();

        coordinator.all_reduce_sum(&mut kolmo_y);

        let norm = 1.0 / kolmo_y[0];
        for v in kolmo_y.iter_mut() {
            *v *= norm;
        }

        // Correlation length: scan from the right for the first index
        // (moving inward) at which |rho| >= corrlim.
        let mut icorr = nr - 1;
        while icorr > 0 && kolmo_y[icorr].abs() < CORRLIM {
            icorr -= 1;
        }
        let rcorr = kolmo_x[icorr];
        let rcorrsq = rcorr * rcorr;

        debug!("rcorr = {rcorr} m (corrlim = {CORRLIM})");

        Self {
            kolmo_x,
            kolmo_y,
            rmin_kolmo,
            rmax_kolmo,
            rcorr,
            rcorrsq,
        }
    }

    /// Evaluate `rho(r)` by bisection search plus linear interpolation
    /// (spec.md §4.3 `kolmogorov`).
    pub fn kolmogorov(&self, r: f64) -> Result<f64, AtmSimError> {
        if r == 0.0 {
            return Ok(self.kolmo_y[0]);
        }
        if r == self.rmax_kolmo {
            return Ok(self.kolmo_y[self.kolmo_x.len() - 1]);
        }
        if r < self.rmin_kolmo || r > self.rmax_kolmo {
            return RadialOutOfGridSnafu { r }.fail();
        }

        let mut low = 0_i64;
        let mut high = self.kolmo_x.len() as i64 - 1;
        let ir = loop {
            let mid = low + (high - low) / 2;
            if self.kolmo_x[mid as usize] <= r && r <= self.kolmo_x[mid as usize + 1] {
                break mid as usize;
            }
            if r < self.kolmo_x[mid as usize] {
                high = mid;
            } else {
                low = mid;
            }
        };

        let rlow = self.kolmo_x[ir];
        let rhigh = self.kolmo_x[ir + 1];
        let rdist = (r - rlow) / (rhigh - rlow);
        let vlow = self.kolmo_y[ir];
        let vhigh = self.kolmo_y[ir + 1];
        Ok((1.0 - rdist) * vlow + rdist * vhigh)
    }
}
