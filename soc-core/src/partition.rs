//! Cone partition descriptor.
//!
//! A flat vector of length N is split into contiguous cone blocks by two
//! parallel arrays:
//!
//! - `orders[i]`: size of the block containing index i
//! - `first_inds[i]`: global index of that block's scalar (first) entry
//!
//! A well-formed descriptor satisfies `first_inds[i] <= i < first_inds[i] + orders[i]`
//! for every i, and the blocks tile `[0, N)` without gaps or overlaps.
//!
//! The descriptor is replicated: every rank holds the same copy, which lets
//! each rank plan cross-process exchanges without extra communication.

use serde::{Deserialize, Serialize};

use crate::error::{SocError, SocResult};

/// A single cone block `[first, first + order)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    /// Global index of the scalar entry
    pub first: usize,
    /// Number of entries in the block
    pub order: usize,
}

impl Block {
    /// One past the last global index of the block.
    #[inline]
    pub fn end(&self) -> usize {
        self.first + self.order
    }

    #[inline]
    pub fn contains(&self, i: usize) -> bool {
        self.first <= i && i < self.end()
    }
}

/// Validated `(orders, first_inds)` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConePartition {
    orders: Vec<usize>,
    first_inds: Vec<usize>,
    num_blocks: usize,
}

impl ConePartition {
    /// Validate and wrap a descriptor for a vector of length `orders.len()`.
    pub fn new(orders: Vec<usize>, first_inds: Vec<usize>) -> SocResult<Self> {
        if orders.len() != first_inds.len() {
            return Err(SocError::MalformedPartition {
                index: orders.len().min(first_inds.len()),
                reason: format!(
                    "orders has {} entries but first_inds has {}",
                    orders.len(),
                    first_inds.len()
                ),
            });
        }

        let n = orders.len();
        let mut num_blocks = 0;
        let mut i = 0;
        while i < n {
            let first = first_inds[i];
            let order = orders[i];

            if first != i {
                // The previous block ended exactly at i, so i must open a new one.
                let reason = if first > i {
                    format!("index is uncovered (first_inds = {first} points past it)")
                } else {
                    format!("index is covered twice (first_inds = {first} reopens an earlier block)")
                };
                return Err(SocError::MalformedPartition { index: i, reason });
            }
            if order == 0 {
                return Err(SocError::MalformedPartition {
                    index: i,
                    reason: "block order is zero".into(),
                });
            }
            if order > n - i {
                return Err(SocError::MalformedPartition {
                    index: i,
                    reason: format!("block of order {order} runs past the end (N = {n})"),
                });
            }

            for j in i..i + order {
                if first_inds[j] != first || orders[j] != order {
                    return Err(SocError::MalformedPartition {
                        index: j,
                        reason: format!(
                            "block is not contiguous: expected (first {first}, order {order}), \
                             found (first {}, order {})",
                            first_inds[j], orders[j]
                        ),
                    });
                }
            }

            num_blocks += 1;
            i += order;
        }

        Ok(Self {
            orders,
            first_inds,
            num_blocks,
        })
    }

    /// Build a descriptor from consecutive block sizes.
    pub fn from_block_orders(block_orders: &[usize]) -> SocResult<Self> {
        let n: usize = block_orders.iter().sum();
        let mut orders = Vec::with_capacity(n);
        let mut first_inds = Vec::with_capacity(n);
        for &order in block_orders {
            let first = orders.len();
            if order == 0 {
                return Err(SocError::MalformedPartition {
                    index: first,
                    reason: "block order is zero".into(),
                });
            }
            orders.extend(std::iter::repeat(order).take(order));
            first_inds.extend(std::iter::repeat(first).take(order));
        }
        Self::new(orders, first_inds)
    }

    /// `num_blocks` blocks of the same order.
    pub fn uniform(num_blocks: usize, order: usize) -> SocResult<Self> {
        Self::from_block_orders(&vec![order; num_blocks])
    }

    /// Length N of the partitioned vector.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    pub fn orders(&self) -> &[usize] {
        &self.orders
    }

    pub fn first_inds(&self) -> &[usize] {
        &self.first_inds
    }

    /// The block containing global index `i`.
    pub fn block_of(&self, i: usize) -> SocResult<Block> {
        if i >= self.len() {
            return Err(SocError::OutOfRange(format!(
                "index {i} outside partition of length {}",
                self.len()
            )));
        }
        Ok(Block {
            first: self.first_inds[i],
            order: self.orders[i],
        })
    }

    /// True iff `i` is the scalar entry of its block.
    pub fn is_scalar_entry(&self, i: usize) -> bool {
        i < self.len() && self.first_inds[i] == i
    }

    /// Distinct blocks in ascending `first` order.
    ///
    /// The iterator is lazy and `Clone`, so it can be restarted cheaply.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            partition: self,
            next: 0,
        }
    }

    /// Blocks intersecting the global range `[start, end)`.
    pub fn blocks_in(&self, start: usize, end: usize) -> LimitedBlocks<'_> {
        let next = if start < self.len() {
            self.first_inds[start]
        } else {
            self.len()
        };
        Blocks {
            partition: self,
            next,
        }
        .with_limit(end)
    }

    /// Check that a vector of length `n` can be used with this descriptor.
    pub fn check_len(&self, n: usize) -> SocResult<()> {
        if n != self.len() {
            return Err(SocError::DimensionMismatch {
                expected: self.len(),
                actual: n,
            });
        }
        Ok(())
    }
}

/// Lazy iterator over the blocks of a [`ConePartition`].
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    partition: &'a ConePartition,
    next: usize,
}

impl<'a> Blocks<'a> {
    fn with_limit(self, end: usize) -> LimitedBlocks<'a> {
        LimitedBlocks { inner: self, end }
    }
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.next >= self.partition.len() {
            return None;
        }
        let block = Block {
            first: self.next,
            order: self.partition.orders[self.next],
        };
        self.next = block.end();
        Some(block)
    }
}

/// Blocks whose first entry lies before a limit.
#[derive(Debug, Clone)]
pub struct LimitedBlocks<'a> {
    inner: Blocks<'a>,
    end: usize,
}

impl Iterator for LimitedBlocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        if self.inner.next >= self.end {
            return None;
        }
        self.inner.next()
    }
}
