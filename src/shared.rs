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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A realization array backed by shared, bit-cast `AtomicU64` storage
/// (spec.md §9 Re-architecture guidance: "on one node, multiple processes
/// may share the same realization buffer instead of each holding a private
/// copy"). Exactly one peer is expected to write each slot (the owning
/// rank of that voxel's compressed index); every other peer only reads.
#[derive(Debug)]
pub struct SharedSlab {
    words: Vec<AtomicU64>,
}

impl SharedSlab {
    pub fn zeroed(len: usize) -> Arc<Self> {
        let mut words = Vec::with_capacity(len);
        words.resize_with(len, || AtomicU64::new(0));
        Arc::new(Self { words })
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn get(&self, index: usize) -> f64 {
        f64::from_bits(self.words[index].load(Ordering::Acquire))
    }

    /// Single-writer store: callers must guarantee no other peer writes
    /// the same `index` concurrently.
    pub fn set(&self, index: usize, value: f64) {
        self.words[index].store(value.to_bits(), Ordering::Release);
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.words
            .iter()
            .map(|w| f64::from_bits(w.load(Ordering::Acquire)))
            .collect()
    }
}

/// Storage backing one realization: either privately owned, or a handle
/// into a slab shared with other cooperating peers (spec.md §5/§9).
#[derive(Clone, Debug)]
pub enum RealizationStore {
    Private(Vec<f64>),
    Shared(Arc<SharedSlab>),
}

impl RealizationStore {
    pub fn private_zeroed(len: usize) -> Self {
        Self::Private(vec![0.0; len])
    }

    pub fn shared_zeroed(len: usize) -> Self {
        Self::Shared(SharedSlab::zeroed(len))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Private(v) => v.len(),
            Self::Shared(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> f64 {
        match self {
            Self::Private(v) => v[index],
            Self::Shared(s) => s.get(index),
        }
    }

    pub fn set(&mut self, index: usize, value: f64) {
        match self {
            Self::Private(v) => v[index] = value,
            Self::Shared(s) => s.set(index, value),
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Self::Private(v) => v.clone(),
            Self::Shared(s) => s.to_vec(),
        }
    }
}

#[cfg(test)]
mod shared_ut {
    use super::*;
    use std::thread;

    #[test]
    fn test_private_store_roundtrip() {
        let mut store = RealizationStore::private_zeroed(4);
        store.set(2, 3.5);
        assert_eq!(store.get(2), 3.5);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_shared_store_roundtrip() {
        let mut store = RealizationStore::shared_zeroed(4);
        store.set(1, 9.25);
        assert_eq!(store.get(1), 9.25);
    }

    #[test]
    fn test_shared_slab_visible_across_threads() {
        let slab = SharedSlab::zeroed(8);
        let writer = Arc::clone(&slab);
        let handle = thread::spawn(move || {
            for i in 0..8 {
                writer.set(i, i as f64 * 1.5);
            }
        });
        handle.join().unwrap();
        for i in 0..8 {
            assert_eq!(slab.get(i), i as f64 * 1.5);
        }
    }

    #[test]
    fn test_to_vec_matches_elementwise_get() {
        let mut store = RealizationStore::private_zeroed(3);
        store.set(0, 1.0);
        store.set(1, 2.0);
        store.set(2, 3.0);
        assert_eq!(store.to_vec(), vec![1.0, 2.0, 3.0]);
    }
}
