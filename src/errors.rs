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

use snafu::Snafu;

/// Errors raised while constructing or querying an atmospheric realization.
///
/// `CacheMissOrCorrupt` is always handled internally by the cache layer and
/// converted into a rebuild; it is still a variant of this shared enum (and
/// not a private type) so tests can assert on it directly.
#[derive(Debug, Snafu, PartialEq, Clone)]
#[snafu(visibility(pub(crate)))]
pub enum AtmSimError {
    #[snafu(display("invalid configuration: {details}"))]
    ConfigurationError { details: String },

    #[snafu(display(
        "could not satisfy parameter constraints after drawing 10 000 normal variates"
    ))]
    SamplingExhausted,

    #[snafu(display("allocation failure: {details}"))]
    AllocationFailure { details: String },

    #[snafu(display("sparse Cholesky factorization failed after all band-retry attempts"))]
    FactorizationFailure,

    #[snafu(display("cache miss or corrupt cache entry: {details}"))]
    CacheMissOrCorrupt { details: String },

    #[snafu(display("observation cone contains zero voxels"))]
    EmptyObservationCone,

    #[snafu(display("ray sample left the simulated volume at ({x}, {y}, {z})"))]
    InterpolationOutOfRange { x: f64, y: f64, z: f64 },

    #[snafu(display("kolmogorov(r) requested at r = {r}, outside the gridded range"))]
    RadialOutOfGrid { r: f64 },
}

pub type AtmSimResult<T> = std::result::Result<T, AtmSimError>;
