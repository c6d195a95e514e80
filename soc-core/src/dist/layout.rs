//! Ownership of global indices.
//!
//! Every global index in `[0, N)` is owned by exactly one rank. Ranks own
//! contiguous ranges in rank order; a rank may own an empty range.

use std::ops::Range;

use crate::error::{SocError, SocResult};

/// Contiguous distribution of `N` entries over `P` ranks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Rank r owns `offsets[r]..offsets[r + 1]`.
    offsets: Vec<usize>,
}

impl Distribution {
    /// Near-even split: the first `n % p` ranks own one extra entry.
    pub fn even(n: usize, num_ranks: usize) -> SocResult<Self> {
        if num_ranks == 0 {
            return Err(SocError::OutOfRange("distribution needs at least one rank".into()));
        }
        let base = n / num_ranks;
        let rem = n % num_ranks;
        let lengths: Vec<usize> = (0..num_ranks)
            .map(|rank| base + usize::from(rank < rem))
            .collect();
        Self::from_local_lengths(&lengths)
    }

    /// Explicit per-rank lengths, in rank order.
    pub fn from_local_lengths(lengths: &[usize]) -> SocResult<Self> {
        if lengths.is_empty() {
            return Err(SocError::OutOfRange("distribution needs at least one rank".into()));
        }
        let mut offsets = Vec::with_capacity(lengths.len() + 1);
        let mut cursor = 0usize;
        offsets.push(cursor);
        for &len in lengths {
            cursor += len;
            offsets.push(cursor);
        }
        Ok(Self { offsets })
    }

    /// Global length N.
    pub fn len(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_ranks(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Global index range owned by `rank`.
    pub fn range(&self, rank: usize) -> Range<usize> {
        self.offsets[rank]..self.offsets[rank + 1]
    }

    pub fn local_len(&self, rank: usize) -> usize {
        self.offsets[rank + 1] - self.offsets[rank]
    }

    /// Resolve a global index to `(owner rank, local offset)`.
    pub fn owner(&self, i: usize) -> SocResult<(usize, usize)> {
        if i >= self.len() {
            return Err(SocError::OutOfRange(format!(
                "index {i} outside vector of length {}",
                self.len()
            )));
        }
        // Last rank whose range starts at or before i; empty ranges are skipped
        // because their successor starts at the same offset.
        let rank = self.offsets.partition_point(|&start| start <= i) - 1;
        Ok((rank, i - self.offsets[rank]))
    }

    /// Span of ranks covering the global range `[start, end)`.
    ///
    /// Empty ranks strictly inside the span are included; check
    /// `local_len` before expecting data from them.
    pub fn owners_of(&self, start: usize, end: usize) -> SocResult<Range<usize>> {
        if start >= end {
            return Ok(0..0);
        }
        let (first, _) = self.owner(start)?;
        let (last, _) = self.owner(end - 1)?;
        Ok(first..last + 1)
    }

    pub(crate) fn check_group_size(&self, size: usize) -> SocResult<()> {
        if self.num_ranks() != size {
            return Err(SocError::DimensionMismatch {
                expected: size,
                actual: self.num_ranks(),
            });
        }
        Ok(())
    }
}
