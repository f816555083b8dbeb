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

//! Atmospheric time-ordered-data simulator for ground-based mm/submm
//! telescopes: draws turbulence parameters, builds the voxel volume swept
//! by an observing cone, factors its Kolmogorov covariance slice by slice,
//! and replays the result as ray-stepped brightness-temperature samples.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod geometry;
pub mod kolmogorov;
pub mod observer;
pub mod rng;
pub mod sampler;
pub mod shared;
pub mod simulator;
pub mod sparse;

pub mod prelude {
    pub use crate::cache::{load_realization, save_realization, CachedRealization};
    pub use crate::config::{Configurable, ScalarPrior, SimConfig};
    pub use crate::coordinator::{Coordinator, PeerGroup, SingleProcess};
    pub use crate::errors::{AtmSimError, AtmSimResult};
    pub use crate::geometry::{compress_volume, CompressedIndex, VolumeGrid};
    pub use crate::kolmogorov::KolmogorovTable;
    pub use crate::observer::{observe, BatchObserveReport, ObserveOutcome};
    pub use crate::rng::{CounterStream, Pcg64CounterStream, PrngStream};
    pub use crate::sampler::{draw_params, DrawnParams, WindVector};
    pub use crate::shared::{RealizationStore, SharedSlab};
    pub use crate::simulator::AtmSim;
}
