//! Multi-threaded match-finder pipeline.
//!
//! Three stages over two bounded rings:
//!
//! 1. **Hash worker** reads the window and computes the hash triple for
//!    every position, publishing them in block-sized batches.
//! 2. **Tree worker** owns the hash tables and the `son` arena; it pops
//!    hash blocks, runs the exact single-threaded lookup per position,
//!    and publishes the match lists packed as counted runs.
//! 3. The encoder thread consumes match lists through [`MtConsumer`].
//!
//! Because the tree worker executes the same traversal the in-thread
//! finder would, the encoder sees identical match lists and the output
//! bitstream is identical with the pipeline on or off.
//!
//! Each ring hands off whole blocks: producers publish occupancy with a
//! release increment and consumers observe it with an acquire decrement,
//! and a pair of condvars handles the empty/full sleeps. Closing a ring
//! wakes everyone; producers drain and exit without further output,
//! which is also the cancellation path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread;

use crate::match_finder::{
    HashTriple, Match, MatchFinder, MatchFinderParams, MatchSource, hash_triple,
    hash4_mask_for_dict,
};

/// Inputs smaller than this encode single-threaded even when the
/// pipeline is requested; the handoff overhead would dominate.
pub(crate) const MT_MIN_INPUT: usize = 128 * 1024;

/// Positions per pipeline block.
const BLOCK_POSITIONS: usize = 4096;

/// Blocks buffered per ring.
const RING_BLOCKS: usize = 4;

struct HashBlock {
    /// Positions covered by this block.
    total: usize,
    /// One triple per hashable position; shorter than `total` only in
    /// the final block, where the tail cannot form a 4-byte prefix.
    triples: Vec<HashTriple>,
}

struct MatchBlock {
    /// Counted runs: `count, len, dist, len, dist, ...` per position.
    packed: Vec<u32>,
}

/// Bounded SPSC block ring.
struct Ring<T> {
    queue: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    /// Published occupancy: release on push, acquire on pop.
    occupied: AtomicUsize,
    closed: AtomicBool,
}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            occupied: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A poisoned queue only means a peer panicked; the data is plain
        // blocks and still consistent, so keep draining.
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocking push; returns false once the ring is closed.
    fn push(&self, item: T) -> bool {
        let mut q = self.lock();
        while q.len() == self.capacity {
            if self.closed.load(Ordering::Acquire) {
                return false;
            }
            q = self.not_full.wait(q).unwrap_or_else(|e| e.into_inner());
        }
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        q.push_back(item);
        self.occupied.fetch_add(1, Ordering::Release);
        self.not_empty.notify_one();
        true
    }

    /// Blocking pop; `None` once the ring is closed and drained.
    fn pop(&self) -> Option<T> {
        let mut q = self.lock();
        loop {
            if let Some(item) = q.pop_front() {
                self.occupied.fetch_sub(1, Ordering::Acquire);
                self.not_full.notify_one();
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            q = self.not_empty.wait(q).unwrap_or_else(|e| e.into_inner());
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

/// Consumer end of the matches ring, presented to the encoder as an
/// ordinary match source.
pub(crate) struct MtConsumer<'a> {
    ring: &'a Ring<MatchBlock>,
    packed: Vec<u32>,
    cursor: usize,
}

impl MtConsumer<'_> {
    /// Ensure the cursor sits on the next position's run.
    fn refill(&mut self) -> bool {
        while self.cursor >= self.packed.len() {
            match self.ring.pop() {
                Some(block) => {
                    self.packed = block.packed;
                    self.cursor = 0;
                }
                None => return false,
            }
        }
        true
    }
}

impl MatchSource for MtConsumer<'_> {
    fn matches(&mut self, _data: &[u8], out: &mut Vec<Match>) {
        out.clear();
        if !self.refill() {
            return;
        }
        let count = self.packed[self.cursor] as usize;
        self.cursor += 1;
        for _ in 0..count {
            out.push(Match {
                len: self.packed[self.cursor],
                dist: self.packed[self.cursor + 1],
            });
            self.cursor += 2;
        }
    }

    fn skip(&mut self, _data: &[u8], n: usize) {
        for _ in 0..n {
            if !self.refill() {
                return;
            }
            let count = self.packed[self.cursor] as usize;
            self.cursor += 1 + 2 * count;
        }
    }
}

/// Run `f` with a pipelined match source over `data`.
///
/// The worker threads are scoped to this call: whatever `f` returns
/// (including an early cancellation error), both rings are closed, the
/// workers drain, and the threads are joined before returning.
pub(crate) fn with_pipeline<R>(
    data: &[u8],
    params: MatchFinderParams,
    f: impl FnOnce(&mut dyn MatchSource) -> R,
) -> R {
    let hash_ring = Ring::<HashBlock>::new(RING_BLOCKS);
    let match_ring = Ring::<MatchBlock>::new(RING_BLOCKS);
    let mask = hash4_mask_for_dict(params.dict_size);

    thread::scope(|s| {
        let hr = &hash_ring;
        let mr = &match_ring;

        s.spawn(move || {
            // Positions this close to the end have no 4-byte prefix.
            let hashed_end = data.len().saturating_sub(3);
            let mut start = 0usize;
            while start < data.len() {
                let total = BLOCK_POSITIONS.min(data.len() - start);
                let mut triples = Vec::with_capacity(total);
                for p in start..(start + total).min(hashed_end) {
                    triples.push(hash_triple(data, p, mask));
                }
                if !hr.push(HashBlock { total, triples }) {
                    return;
                }
                start += total;
            }
            hr.close();
        });

        s.spawn(move || {
            let mut finder = MatchFinder::new(params);
            let mut scratch: Vec<Match> = Vec::with_capacity(64);
            while let Some(block) = hr.pop() {
                let mut packed = Vec::with_capacity(block.total * 3);
                for i in 0..block.total {
                    if i < block.triples.len() {
                        finder.matches_with_hash(data, block.triples[i], &mut scratch);
                        packed.push(scratch.len() as u32);
                        for m in &scratch {
                            packed.push(m.len);
                            packed.push(m.dist);
                        }
                    } else {
                        finder.advance_unhashed();
                        packed.push(0);
                    }
                }
                if !mr.push(MatchBlock { packed }) {
                    break;
                }
            }
            mr.close();
        });

        let mut consumer = MtConsumer {
            ring: mr,
            packed: Vec::new(),
            cursor: 0,
        };
        let result = f(&mut consumer);

        // Shut the pipeline down whether or not the consumer drained it.
        hash_ring.close();
        match_ring.close();
        result
    })
}
