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

use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rand_pcg::Pcg64Mcg;

/// A counter-based pseudo-random stream of unit-normal variates.
///
/// The real simulator is meant to be driven by a genuine counter-based
/// generator (Threefry/Philox) external to this crate (see spec.md §6); this
/// trait is the seam at which such a generator is substituted. The default
/// implementation below reseeds a [`Pcg64Mcg`] from the four key/counter
/// words so that the same four words always reproduce the same stream,
/// which is the only property the rest of the simulator relies on.
pub trait CounterStream {
    /// Fill `out` with `out.len()` independent unit-normal variates drawn
    /// from the stream identified by `(key1, key2, counter1, counter2)`.
    fn fill_normal(&mut self, key1: u64, key2: u64, counter1: u64, counter2: u64, out: &mut [f64]);
}

/// Default [`CounterStream`], backed by [`Pcg64Mcg`] reseeded per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pcg64CounterStream;

impl CounterStream for Pcg64CounterStream {
    fn fill_normal(&mut self, key1: u64, key2: u64, counter1: u64, counter2: u64, out: &mut [f64]) {
        let seed = splitmix_seed(key1, key2, counter1, counter2);
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        for v in out.iter_mut() {
            *v = StandardNormal.sample(&mut rng);
        }
    }
}

/// Combine the four PRNG words into a single 64-bit seed.
///
/// Uses the SplitMix64 finalizer so that nearby `(key, counter)` tuples
/// (e.g. consecutive slices advancing `counter2`) produce decorrelated seeds.
fn splitmix_seed(key1: u64, key2: u64, counter1: u64, counter2: u64) -> u64 {
    let mut z = key1
        ^ key2.rotate_left(17)
        ^ counter1.rotate_left(31)
        ^ counter2.rotate_left(47);
    z = z.wrapping_add(0x9E3779B97F4A7C15);
    let mut x = z;
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

/// A fixed (key, counter) quadruple identifying one random stream, and the
/// cache filename stem derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrngStream {
    pub key1: u64,
    pub key2: u64,
    pub counter1: u64,
    pub counter2: u64,
}

impl PrngStream {
    pub fn new(key1: u64, key2: u64, counter1: u64, counter2: u64) -> Self {
        Self {
            key1,
            key2,
            counter1,
            counter2,
        }
    }

    /// Stem used for cache filenames: `<key1>_<key2>_<c1>_<c2>`.
    pub fn cache_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.key1, self.key2, self.counter1, self.counter2
        )
    }
}
