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

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::errors::{AtmSimError, ConfigurationSnafu};
use crate::rng::PrngStream;

/// A normal distribution over one scalar physical parameter, specified as a
/// center and standard deviation (sigma = 0 means the parameter is fixed).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarPrior {
    pub center: f64,
    pub sigma: f64,
}

impl ScalarPrior {
    pub const fn fixed(center: f64) -> Self {
        Self { center, sigma: 0.0 }
    }

    pub const fn new(center: f64, sigma: f64) -> Self {
        Self { center, sigma }
    }
}

/// All inputs to one atmospheric realization (spec.md §3, `SimConfig`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct SimConfig {
    // Constant-elevation-scan bounds.
    pub azmin: f64,
    pub azmax: f64,
    pub elmin: f64,
    pub elmax: f64,
    pub tmin: f64,
    pub tmax: f64,

    // Voxel steps, in meters.
    #[builder(default = 100.0)]
    pub xstep: f64,
    #[builder(default = 100.0)]
    pub ystep: f64,
    #[builder(default = 100.0)]
    pub zstep: f64,

    // Turbulence and environment priors.
    #[builder(default = ScalarPrior::new(0.01, 0.001))]
    pub lmin: ScalarPrior,
    #[builder(default = ScalarPrior::new(10.0, 10.0))]
    pub lmax: ScalarPrior,
    #[builder(default = ScalarPrior::new(25.0, 10.0))]
    pub w: ScalarPrior,
    #[builder(default = ScalarPrior::new(0.0, 100.0))]
    pub wdir: ScalarPrior,
    #[builder(default = ScalarPrior::new(2000.0, 0.0))]
    pub z0: ScalarPrior,
    #[builder(default = ScalarPrior::new(280.0, 10.0))]
    pub t0: ScalarPrior,

    /// Atmosphere extent used for the vertical temperature-attenuation
    /// factor, in meters.
    #[builder(default = 40_000.0)]
    pub z_atm: f64,
    /// Water-vapor integration extent, in meters; clamped by `rmax*sin(elmax)`.
    #[builder(default = 2_000.0)]
    pub z_max: f64,

    /// PRNG key/counter quadruple identifying this realization's stream.
    pub key1: u64,
    pub key2: u64,
    pub counter1: u64,
    pub counter2: u64,

    /// Directory for the realization cache; `None` disables caching.
    #[builder(default, setter(strip_option))]
    pub cachedir: Option<String>,

    #[builder(default = 0.0)]
    pub rmin: f64,
    #[builder(default = 10_000.0)]
    pub rmax: f64,

    /// Upper bound on the number of compressed indices simulated per slice.
    #[builder(default = 10_000)]
    pub nelem_sim_max: usize,
}

impl SimConfig {
    /// PRNG stream identity for this configuration.
    pub fn prng_stream(&self) -> PrngStream {
        PrngStream::new(self.key1, self.key2, self.counter1, self.counter2)
    }

    /// Validate the configuration invariants from spec.md §3.
    pub fn validate(&self) -> Result<(), AtmSimError> {
        if self.azmin >= self.azmax {
            return ConfigurationSnafu {
                details: format!(
                    "azmin ({}) must be strictly less than azmax ({})",
                    self.azmin, self.azmax
                ),
            }
            .fail();
        }
        if self.elmin < 0.0 {
            return ConfigurationSnafu {
                details: format!("elmin ({}) must be >= 0", self.elmin),
            }
            .fail();
        }
        if self.elmax > std::f64::consts::FRAC_PI_2 {
            return ConfigurationSnafu {
                details: format!("elmax ({}) must be <= pi/2", self.elmax),
            }
            .fail();
        }
        if self.tmin >= self.tmax {
            return ConfigurationSnafu {
                details: format!(
                    "tmin ({}) must be strictly less than tmax ({})",
                    self.tmin, self.tmax
                ),
            }
            .fail();
        }
        if self.lmin.center > self.lmax.center {
            return ConfigurationSnafu {
                details: format!(
                    "lmin_center ({}) must be <= lmax_center ({})",
                    self.lmin.center, self.lmax.center
                ),
            }
            .fail();
        }
        Ok(())
    }
}

/// Loading and saving configuration records as YAML, mirroring the
/// teacher's `io::ConfigRepr` convention.
pub trait Configurable: Sized + serde::Serialize + for<'de> serde::Deserialize<'de> {
    fn load<P: AsRef<Path>>(path: P) -> Result<Self, AtmSimError> {
        let f = File::open(path).map_err(|e| AtmSimError::ConfigurationError {
            details: format!("could not open config file: {e}"),
        })?;
        serde_yaml::from_reader(BufReader::new(f)).map_err(|e| AtmSimError::ConfigurationError {
            details: format!("could not parse config file: {e}"),
        })
    }

    fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<(), AtmSimError> {
        let f = File::create(path).map_err(|e| AtmSimError::ConfigurationError {
            details: format!("could not create config file: {e}"),
        })?;
        serde_yaml::to_writer(BufWriter::new(f), self).map_err(|e| {
            AtmSimError::ConfigurationError {
                details: format!("could not write config file: {e}"),
            }
        })
    }
}

impl Configurable for SimConfig {}
