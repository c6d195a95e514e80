//! Distributed vectors of `f64`.

use std::ops::Range;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::group::ProcessGroup;
use super::layout::Distribution;
use crate::error::{SocError, SocResult};

/// A length-N vector sharded across the ranks of a group.
///
/// Each rank stores only the entries of its own range. Global indices are
/// always used at the API surface; `local()` exposes the owned slice, whose
/// element `k` is global index `local_offset() + k`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistVector {
    dist: Distribution,
    rank: usize,
    local: Vec<f64>,
}

impl DistVector {
    /// Zero vector of length `n`, evenly distributed over the group.
    pub fn zeros<G: ProcessGroup>(group: &G, n: usize) -> SocResult<Self> {
        Self::zeros_with(group, Distribution::even(n, group.size())?)
    }

    /// Zero vector with an explicit distribution.
    pub fn zeros_with<G: ProcessGroup>(group: &G, dist: Distribution) -> SocResult<Self> {
        dist.check_group_size(group.size())?;
        let local = vec![0.0; dist.local_len(group.rank())];
        Ok(Self {
            dist,
            rank: group.rank(),
            local,
        })
    }

    /// Distribute a replicated global vector evenly; each rank keeps its part.
    pub fn from_global<G: ProcessGroup>(group: &G, values: &[f64]) -> SocResult<Self> {
        Self::from_global_with(group, Distribution::even(values.len(), group.size())?, values)
    }

    /// Distribute a replicated global vector with an explicit distribution.
    pub fn from_global_with<G: ProcessGroup>(
        group: &G,
        dist: Distribution,
        values: &[f64],
    ) -> SocResult<Self> {
        if values.len() != dist.len() {
            return Err(SocError::DimensionMismatch {
                expected: dist.len(),
                actual: values.len(),
            });
        }
        let local = values[dist.range(group.rank())].to_vec();
        Self::from_local(group, dist, local)
    }

    /// Wrap this rank's entries.
    pub fn from_local<G: ProcessGroup>(
        group: &G,
        dist: Distribution,
        local: Vec<f64>,
    ) -> SocResult<Self> {
        dist.check_group_size(group.size())?;
        let expected = dist.local_len(group.rank());
        if local.len() != expected {
            return Err(SocError::DimensionMismatch {
                expected,
                actual: local.len(),
            });
        }
        Ok(Self {
            dist,
            rank: group.rank(),
            local,
        })
    }

    /// Entries drawn uniformly from `[center - radius, center + radius]`.
    ///
    /// The value at each global index depends only on `seed`, not on how the
    /// vector is distributed.
    pub fn uniform<G: ProcessGroup>(
        group: &G,
        n: usize,
        center: f64,
        radius: f64,
        seed: u64,
    ) -> SocResult<Self> {
        Self::uniform_with(group, Distribution::even(n, group.size())?, center, radius, seed)
    }

    /// [`DistVector::uniform`] with an explicit distribution.
    pub fn uniform_with<G: ProcessGroup>(
        group: &G,
        dist: Distribution,
        center: f64,
        radius: f64,
        seed: u64,
    ) -> SocResult<Self> {
        if !(radius >= 0.0) || !center.is_finite() {
            return Err(SocError::OutOfRange(format!(
                "uniform sampling needs a finite center and radius >= 0 (got {center}, {radius})"
            )));
        }
        let range = dist.range(group.rank());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        // Each f64 draw consumes two 32-bit words of the stream.
        rng.set_word_pos(2 * range.start as u128);
        let local: Vec<f64> = range
            .map(|_| center + radius * (2.0 * rng.gen::<f64>() - 1.0))
            .collect();
        Self::from_local(group, dist, local)
    }

    /// Zero vector with the same layout.
    pub fn zeros_like(&self) -> Self {
        Self {
            dist: self.dist.clone(),
            rank: self.rank,
            local: vec![0.0; self.local.len()],
        }
    }

    /// Same layout, new local entries.
    pub(crate) fn with_local(&self, local: Vec<f64>) -> Self {
        debug_assert_eq!(local.len(), self.local.len());
        Self {
            dist: self.dist.clone(),
            rank: self.rank,
            local,
        }
    }

    /// Global length N.
    pub fn len(&self) -> usize {
        self.dist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dist.is_empty()
    }

    pub fn distribution(&self) -> &Distribution {
        &self.dist
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn local(&self) -> &[f64] {
        &self.local
    }

    pub fn local_mut(&mut self) -> &mut [f64] {
        &mut self.local
    }

    /// Global index of `local()[0]`.
    pub fn local_offset(&self) -> usize {
        self.dist.range(self.rank).start
    }

    /// Global indices owned by this rank.
    pub fn local_range(&self) -> Range<usize> {
        self.dist.range(self.rank)
    }

    pub fn is_local(&self, i: usize) -> bool {
        self.local_range().contains(&i)
    }

    fn local_index(&self, i: usize) -> SocResult<usize> {
        let (owner, offset) = self.dist.owner(i)?;
        if owner != self.rank {
            return Err(SocError::OutOfRange(format!(
                "index {i} is owned by rank {owner}, not rank {}",
                self.rank
            )));
        }
        Ok(offset)
    }

    /// Read a locally owned global index.
    pub fn get(&self, i: usize) -> SocResult<f64> {
        Ok(self.local[self.local_index(i)?])
    }

    /// Write a locally owned global index.
    pub fn set(&mut self, i: usize, value: f64) -> SocResult<()> {
        let k = self.local_index(i)?;
        self.local[k] = value;
        Ok(())
    }

    /// Write `value` at `i` if this rank owns it; other ranks ignore the call.
    ///
    /// Lets SPMD code address global indices without branching on the owner.
    pub fn set_if_local(&mut self, i: usize, value: f64) -> SocResult<()> {
        if i >= self.len() {
            return Err(SocError::OutOfRange(format!(
                "index {i} outside vector of length {}",
                self.len()
            )));
        }
        if self.is_local(i) {
            self.set(i, value)?;
        }
        Ok(())
    }

    /// Fail unless `other` has the same length and distribution.
    pub fn check_layout(&self, other: &DistVector) -> SocResult<()> {
        if self.dist != other.dist {
            return Err(SocError::DimensionMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(())
    }

    /// self += alpha * x
    pub fn axpy(&mut self, alpha: f64, x: &DistVector) -> SocResult<()> {
        self.check_layout(x)?;
        for (yi, &xi) in self.local.iter_mut().zip(&x.local) {
            *yi += alpha * xi;
        }
        Ok(())
    }

    /// Assemble the full vector on every rank (collective).
    pub fn gather_all<G: ProcessGroup>(&self, group: &G) -> SocResult<Vec<f64>> {
        let parts = group.all_gather(&self.local)?;
        let mut full = Vec::with_capacity(self.len());
        for part in parts {
            full.extend(part);
        }
        if full.len() != self.len() {
            return Err(SocError::DimensionMismatch {
                expected: self.len(),
                actual: full.len(),
            });
        }
        Ok(full)
    }
}
