//! Block exchange: combining per-block reductions across ranks.
//!
//! A cone block may straddle rank boundaries. Every operation in
//! [`crate::ops`] reduces each block to a few scalars (scalar part, squared
//! norm of the vector part, dot products). Each rank computes partial sums
//! over the entries it owns, [`BlockExchange::combine`] turns them into
//! block totals on every rank that owns part of the block, and each owner
//! then applies the elementwise map locally.
//!
//! Blocks are routed three ways:
//!
//! - **Local**: entirely owned by one rank, no communication.
//! - **Home**: straddling with `order <= cutoff`. Partials go to the rank
//!   owning the block's first entry, are summed there and sent back to the
//!   participating ranks (two sparse all-to-all rounds for all such blocks).
//! - **Reduce**: straddling with `order > cutoff`. One dense all-reduce over
//!   all such blocks.
//!
//! Both communicating routes add contributions in rank order starting from
//! zero, so the totals are bitwise identical whichever route a block takes.

use std::ops::Range;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::group::ProcessGroup;
use super::layout::Distribution;
use crate::error::{SocError, SocResult};
use crate::partition::{Block, ConePartition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Local,
    Home { home: usize },
    Reduce { slot: usize },
}

/// The part of a block owned by this rank.
#[derive(Debug, Clone)]
pub struct LocalBlock {
    /// The full block
    pub block: Block,
    /// Local offsets of the owned entries
    pub range: Range<usize>,
    /// This rank owns the block's first (scalar) entry
    pub holds_first: bool,
    route: Route,
}

impl LocalBlock {
    /// The owned entries of `local`.
    #[inline]
    pub fn segment<'a>(&self, local: &'a [f64]) -> &'a [f64] {
        &local[self.range.clone()]
    }

    /// Scalar entry if owned here, else 0 (so it sums to the scalar entry).
    #[inline]
    pub fn head(&self, local: &[f64]) -> f64 {
        if self.holds_first {
            local[self.range.start]
        } else {
            0.0
        }
    }

    /// Owned entries of the vector part.
    #[inline]
    pub fn rest<'a>(&self, local: &'a [f64]) -> &'a [f64] {
        let seg = self.segment(local);
        if self.holds_first {
            &seg[1..]
        } else {
            seg
        }
    }

    /// True if no other rank owns part of this block.
    pub fn is_local(&self) -> bool {
        self.route == Route::Local
    }
}

/// A routed block whose totals are assembled on this rank.
#[derive(Debug, Clone)]
struct HomedBlock {
    /// Index into `BlockExchange::blocks`
    index: usize,
    /// Ranks owning entries of the block, ascending (includes this rank)
    participants: Vec<usize>,
}

/// Communication plan for one `(partition, distribution, rank, cutoff)`.
#[derive(Debug, Clone)]
pub struct BlockExchange {
    rank: usize,
    size: usize,
    blocks: Vec<LocalBlock>,
    homed: Vec<HomedBlock>,
    /// Some block anywhere takes the home route
    any_routed: bool,
    /// Number of blocks anywhere taking the reduce route
    num_reduced: usize,
}

impl BlockExchange {
    /// Plan the exchange for this rank.
    ///
    /// The partition and distribution are replicated, so every rank derives
    /// the same global decisions (which collectives run, slot layout).
    pub fn new(
        partition: &ConePartition,
        dist: &Distribution,
        rank: usize,
        cutoff: usize,
    ) -> SocResult<Self> {
        partition.check_len(dist.len())?;
        if rank >= dist.num_ranks() {
            return Err(SocError::OutOfRange(format!(
                "rank {rank} outside distribution over {} ranks",
                dist.num_ranks()
            )));
        }

        let own = dist.range(rank);
        let mut blocks = Vec::new();
        let mut homed = Vec::new();
        let mut any_routed = false;
        let mut num_reduced = 0;

        for block in partition.blocks() {
            let span = dist.owners_of(block.first, block.end())?;
            let home = span.start;
            let straddles = span.len() > 1;

            let route = if !straddles {
                Route::Local
            } else if block.order <= cutoff {
                any_routed = true;
                Route::Home { home }
            } else {
                num_reduced += 1;
                Route::Reduce {
                    slot: num_reduced - 1,
                }
            };

            let lo = block.first.max(own.start);
            let hi = block.end().min(own.end);
            if lo >= hi {
                continue;
            }

            if route == (Route::Home { home }) && home == rank {
                let participants = span.filter(|&p| dist.local_len(p) > 0).collect();
                homed.push(HomedBlock {
                    index: blocks.len(),
                    participants,
                });
            }

            blocks.push(LocalBlock {
                block,
                range: lo - own.start..hi - own.start,
                holds_first: home == rank,
                route,
            });
        }

        log::debug!(
            "block exchange rank {rank}: {} local blocks ({} homed here), routed={any_routed}, reduced={num_reduced}",
            blocks.len(),
            homed.len(),
        );

        Ok(Self {
            rank,
            size: dist.num_ranks(),
            blocks,
            homed,
            any_routed,
            num_reduced,
        })
    }

    /// Blocks touching this rank, ascending by first index.
    pub fn blocks(&self) -> &[LocalBlock] {
        &self.blocks
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Fill `k` partial sums per local block with `f`.
    pub fn partials<F>(&self, k: usize, f: F) -> Vec<f64>
    where
        F: Fn(&LocalBlock, &mut [f64]) + Sync + Send,
    {
        assert!(k > 0, "at least one reduction per block");
        let mut out = vec![0.0; k * self.blocks.len()];

        #[cfg(feature = "parallel")]
        out.par_chunks_mut(k)
            .zip(self.blocks.par_iter())
            .for_each(|(chunk, lb)| f(lb, chunk));

        #[cfg(not(feature = "parallel"))]
        out.chunks_mut(k)
            .zip(self.blocks.iter())
            .for_each(|(chunk, lb)| f(lb, chunk));

        out
    }

    /// Apply `f(block, totals, segment)` to every owned segment of `out`.
    pub fn map_blocks<F>(&self, totals: &[f64], k: usize, out: &mut [f64], f: F)
    where
        F: Fn(&LocalBlock, &[f64], &mut [f64]) + Sync + Send,
    {
        assert!(k > 0, "at least one reduction per block");
        assert_eq!(totals.len(), k * self.blocks.len());

        // Owned segments tile the local slice in block order.
        let mut segments = Vec::with_capacity(self.blocks.len());
        let mut rest = out;
        for lb in &self.blocks {
            let (seg, tail) = std::mem::take(&mut rest).split_at_mut(lb.range.len());
            segments.push(seg);
            rest = tail;
        }
        debug_assert!(rest.is_empty());

        #[cfg(feature = "parallel")]
        self.blocks
            .par_iter()
            .zip(segments.into_par_iter())
            .zip(totals.par_chunks(k))
            .for_each(|((lb, seg), tot)| f(lb, tot, seg));

        #[cfg(not(feature = "parallel"))]
        self.blocks
            .iter()
            .zip(segments)
            .zip(totals.chunks(k))
            .for_each(|((lb, seg), tot)| f(lb, tot, seg));
    }

    /// Replace the `k` partials per local block with block totals
    /// (collective).
    pub fn combine<G: ProcessGroup>(&self, group: &G, partials: &mut [f64], k: usize) -> SocResult<()> {
        if group.rank() != self.rank || group.size() != self.size {
            return Err(SocError::DimensionMismatch {
                expected: self.size,
                actual: group.size(),
            });
        }
        if partials.len() != k * self.blocks.len() {
            return Err(SocError::DimensionMismatch {
                expected: k * self.blocks.len(),
                actual: partials.len(),
            });
        }

        if self.any_routed {
            self.combine_at_home(group, partials, k)?;
        }
        if self.num_reduced > 0 {
            self.combine_by_reduce(group, partials, k)?;
        }
        Ok(())
    }

    fn combine_at_home<G: ProcessGroup>(&self, group: &G, partials: &mut [f64], k: usize) -> SocResult<()> {
        // Round 1: partials to the home rank.
        let mut send = vec![Vec::new(); self.size];
        for (bi, lb) in self.blocks.iter().enumerate() {
            if let Route::Home { home } = lb.route {
                if home != self.rank {
                    send[home].extend_from_slice(&partials[bi * k..(bi + 1) * k]);
                }
            }
        }
        let recv = group.all_to_all(send)?;

        // Sum in rank order and queue the totals for the other participants.
        let mut cursor = vec![0usize; self.size];
        let mut replies = vec![Vec::new(); self.size];
        let mut totals = vec![0.0; k];
        for hb in &self.homed {
            totals.fill(0.0);
            for &p in &hb.participants {
                let contribution = if p == self.rank {
                    &partials[hb.index * k..(hb.index + 1) * k]
                } else {
                    let msg = &recv[p];
                    let at = cursor[p];
                    if msg.len() < at + k {
                        return Err(SocError::Communication(format!(
                            "rank {p} sent {} values, expected more for block {}",
                            msg.len(),
                            self.blocks[hb.index].block.first
                        )));
                    }
                    cursor[p] += k;
                    &msg[at..at + k]
                };
                for (acc, &v) in totals.iter_mut().zip(contribution) {
                    *acc += v;
                }
            }
            partials[hb.index * k..(hb.index + 1) * k].copy_from_slice(&totals);
            for &p in &hb.participants {
                if p != self.rank {
                    replies[p].extend_from_slice(&totals);
                }
            }
        }

        // Round 2: totals back to the participants.
        let recv = group.all_to_all(replies)?;
        let mut cursor = vec![0usize; self.size];
        for (bi, lb) in self.blocks.iter().enumerate() {
            if let Route::Home { home } = lb.route {
                if home != self.rank {
                    let msg = &recv[home];
                    let at = cursor[home];
                    if msg.len() < at + k {
                        return Err(SocError::Communication(format!(
                            "home rank {home} sent {} values, expected more for block {}",
                            msg.len(),
                            lb.block.first
                        )));
                    }
                    partials[bi * k..(bi + 1) * k].copy_from_slice(&msg[at..at + k]);
                    cursor[home] += k;
                }
            }
        }
        Ok(())
    }

    fn combine_by_reduce<G: ProcessGroup>(&self, group: &G, partials: &mut [f64], k: usize) -> SocResult<()> {
        let mut buf = vec![0.0; k * self.num_reduced];
        for (bi, lb) in self.blocks.iter().enumerate() {
            if let Route::Reduce { slot } = lb.route {
                buf[slot * k..(slot + 1) * k].copy_from_slice(&partials[bi * k..(bi + 1) * k]);
            }
        }
        group.all_reduce_sum(&mut buf)?;
        for (bi, lb) in self.blocks.iter().enumerate() {
            if let Route::Reduce { slot } = lb.route {
                partials[bi * k..(bi + 1) * k].copy_from_slice(&buf[slot * k..(slot + 1) * k]);
            }
        }
        Ok(())
    }
}
