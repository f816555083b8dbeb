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

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex};

/// Capability required of any cooperating-peer group (spec.md §5 /
/// §9 Re-architecture guidance): the subset of MPI collectives this crate
/// actually uses, abstracted so a single process and a real multi-peer
/// deployment share the same call sites.
pub trait Coordinator: Send + Sync {
    /// This peer's rank, in `[0, ntask)`.
    fn rank(&self) -> usize;
    /// Total number of cooperating peers.
    fn ntask(&self) -> usize;
    /// Block until every peer has reached this call.
    fn barrier(&self);
    /// Broadcast rank 0's value of `value` to every peer.
    fn broadcast_scalar(&self, value: f64) -> f64;
    /// Logical-OR each element of `flags` across all peers, in place.
    fn all_reduce_or(&self, flags: &mut [bool]);
    /// Sum each element of `values` across all peers, in place.
    fn all_reduce_sum(&self, values: &mut [f64]);
}

/// Default, no-op coordinator for a lone process (spec.md §5: "absent a
/// `Coordinator`, every operation behaves as `ntask = 1, rank = 0`").
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Coordinator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn ntask(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn broadcast_scalar(&self, value: f64) -> f64 {
        value
    }

    fn all_reduce_or(&self, _flags: &mut [bool]) {}

    fn all_reduce_sum(&self, _values: &mut [f64]) {}
}

enum PeerMsg {
    Barrier,
    Broadcast(f64),
    ReduceOr(Vec<bool>),
    ReduceSum(Vec<f64>),
}

/// A fixed-size group of in-process peers cooperating over `std::sync`
/// primitives, standing in for a genuine MPI communicator (spec.md §9:
/// "Re-architecture guidance ... model the collective-communication seam as
/// a trait rather than binding directly to an MPI crate").
///
/// Every peer must call the same sequence of `Coordinator` methods in the
/// same order; a mismatched call sequence deadlocks, exactly as a real MPI
/// program would.
pub struct PeerGroup {
    rank: usize,
    ntask: usize,
    barrier: Arc<Barrier>,
    senders: Vec<Sender<PeerMsg>>,
    receiver: Mutex<Receiver<PeerMsg>>,
}

impl PeerGroup {
    /// Build `ntask` linked `PeerGroup` handles, one per rank, sharing a
    /// single barrier and a full mesh of channels.
    pub fn new_mesh(ntask: usize) -> Vec<PeerGroup> {
        assert!(ntask > 0, "a peer group needs at least one member");
        let barrier = Arc::new(Barrier::new(ntask));

        let mut senders: Vec<Vec<Sender<PeerMsg>>> = (0..ntask).map(|_| Vec::new()).collect();
        let mut receivers: Vec<Option<Receiver<PeerMsg>>> = (0..ntask).map(|_| None).collect();

        for rank in 0..ntask {
            let (tx, rx) = std::sync::mpsc::channel();
            for senders_for_other in senders.iter_mut() {
                senders_for_other.push(tx.clone());
            }
            receivers[rank] = Some(rx);
        }

        (0..ntask)
            .map(|rank| PeerGroup {
                rank,
                ntask,
                barrier: Arc::clone(&barrier),
                senders: senders[rank].clone(),
                receiver: Mutex::new(receivers[rank].take().unwrap()),
            })
            .collect()
    }
}

impl Coordinator for PeerGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn ntask(&self) -> usize {
        self.ntask
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    fn broadcast_scalar(&self, value: f64) -> f64 {
        if self.rank == 0 {
            for (peer, tx) in self.senders.iter().enumerate() {
                if peer != self.rank {
                    let _ = tx.send(PeerMsg::Broadcast(value));
                }
            }
            self.barrier();
            value
        } else {
            let rx = self.receiver.lock().expect("peer receiver poisoned");
            let got = match rx.recv().expect("broadcast sender disconnected") {
                PeerMsg::Broadcast(v) => v,
                _ => panic!("unexpected message in broadcast_scalar"),
            };
            drop(rx);
            self.barrier();
            got
        }
    }

    fn all_reduce_or(&self, flags: &mut [bool]) {
        for (peer, tx) in self.senders.iter().enumerate() {
            if peer != self.rank {
                let _ = tx.send(PeerMsg::ReduceOr(flags.to_vec()));
            }
        }
        let rx = self.receiver.lock().expect("peer receiver poisoned");
        for _ in 0..self.ntask - 1 {
            match rx.recv().expect("reduce_or sender disconnected") {
                PeerMsg::ReduceOr(other) => {
                    for (a, b) in flags.iter_mut().zip(other.iter()) {
                        *a = *a || *b;
                    }
                }
                _ => panic!("unexpected message in all_reduce_or"),
            }
        }
        drop(rx);
        self.barrier();
    }

    fn all_reduce_sum(&self, values: &mut [f64]) {
        for (peer, tx) in self.senders.iter().enumerate() {
            if peer != self.rank {
                let _ = tx.send(PeerMsg::ReduceSum(values.to_vec()));
            }
        }
        let rx = self.receiver.lock().expect("peer receiver poisoned");
        for _ in 0..self.ntask - 1 {
            match rx.recv().expect("reduce_sum sender disconnected") {
                PeerMsg::ReduceSum(other) => {
                    for (a, b) in values.iter_mut().zip(other.iter()) {
                        *a += *b;
                    }
                }
                _ => panic!("unexpected message in all_reduce_sum"),
            }
        }
        drop(rx);
        self.barrier();
    }
}

#[cfg(test)]
mod coordinator_ut {
    use super::*;
    use std::thread;

    #[test]
    fn test_single_process_is_identity() {
        let c = SingleProcess;
        assert_eq!(c.rank(), 0);
        assert_eq!(c.ntask(), 1);
        assert_eq!(c.broadcast_scalar(4.2), 4.2);
        let mut flags = vec![true, false];
        c.all_reduce_or(&mut flags);
        assert_eq!(flags, vec![true, false]);
    }

    #[test]
    fn test_peer_group_all_reduce_or() {
        let peers = PeerGroup::new_mesh(3);
        let handles: Vec<_> = peers
            .into_iter()
            .enumerate()
            .map(|(rank, peer)| {
                thread::spawn(move || {
                    let mut flags = vec![false, false, false];
                    flags[rank] = true;
                    peer.all_reduce_or(&mut flags);
                    flags
                })
            })
            .collect();

        for h in handles {
            let flags = h.join().unwrap();
            assert_eq!(flags, vec![true, true, true]);
        }
    }

    #[test]
    fn test_peer_group_all_reduce_sum() {
        let peers = PeerGroup::new_mesh(4);
        let handles: Vec<_> = peers
            .into_iter()
            .map(|peer| {
                thread::spawn(move || {
                    let mut values = vec![1.0];
                    peer.all_reduce_sum(&mut values);
                    values[0]
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 4.0);
        }
    }

    #[test]
    fn test_peer_group_broadcast_from_rank_zero() {
        let peers = PeerGroup::new_mesh(3);
        let handles: Vec<_> = peers
            .into_iter()
            .map(|peer| thread::spawn(move || peer.broadcast_scalar(7.0)))
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), 7.0);
        }
    }
}
