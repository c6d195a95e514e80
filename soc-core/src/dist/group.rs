//! Process groups and collectives.
//!
//! Every distributed operation takes an explicit [`ProcessGroup`] handle.
//! All ranks of a group must issue the same collectives in the same order
//! (SPMD); a rank that skips a collective leaves the others blocked.
//!
//! The only required primitive is a personalized all-to-all exchange. The
//! remaining collectives are provided on top of it and always combine
//! contributions in rank order, so every rank computes bitwise identical
//! reductions.

use std::sync::{Arc, Barrier, Mutex};

use crate::error::{SocError, SocResult};

/// Handle to a group of cooperating ranks.
pub trait ProcessGroup: Sync {
    /// This rank, in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Block until every rank has reached the barrier.
    fn barrier(&self) -> SocResult<()>;

    /// Personalized exchange: `send[r]` goes to rank r; returns `recv` with
    /// `recv[r]` the message rank r addressed to this rank.
    fn all_to_all(&self, send: Vec<Vec<f64>>) -> SocResult<Vec<Vec<f64>>>;

    /// Every rank receives every rank's `local` slice, indexed by rank.
    fn all_gather(&self, local: &[f64]) -> SocResult<Vec<Vec<f64>>> {
        self.all_to_all(vec![local.to_vec(); self.size()])
    }

    /// Replace `buf` on every rank with the root's `buf`.
    fn broadcast(&self, root: usize, buf: &mut Vec<f64>) -> SocResult<()> {
        if root >= self.size() {
            return Err(SocError::OutOfRange(format!(
                "broadcast root {root} outside group of size {}",
                self.size()
            )));
        }
        let send = if self.rank() == root {
            vec![buf.clone(); self.size()]
        } else {
            vec![Vec::new(); self.size()]
        };
        let mut recv = self.all_to_all(send)?;
        *buf = std::mem::take(&mut recv[root]);
        Ok(())
    }

    /// Elementwise sum across ranks, accumulated in rank order.
    fn all_reduce_sum(&self, buf: &mut [f64]) -> SocResult<()> {
        let parts = self.all_gather(buf)?;
        buf.fill(0.0);
        for part in &parts {
            if part.len() != buf.len() {
                return Err(SocError::DimensionMismatch {
                    expected: buf.len(),
                    actual: part.len(),
                });
            }
            for (acc, &v) in buf.iter_mut().zip(part) {
                *acc += v;
            }
        }
        Ok(())
    }

    /// Minimum across ranks.
    fn all_reduce_min(&self, value: f64) -> SocResult<f64> {
        let parts = self.all_gather(&[value])?;
        Ok(parts.iter().filter_map(|p| p.first().copied()).fold(f64::INFINITY, f64::min))
    }

    /// Maximum across ranks.
    fn all_reduce_max(&self, value: f64) -> SocResult<f64> {
        let parts = self.all_gather(&[value])?;
        Ok(parts.iter().filter_map(|p| p.first().copied()).fold(f64::NEG_INFINITY, f64::max))
    }

    /// Integer sum across ranks.
    fn all_reduce_count(&self, count: usize) -> SocResult<usize> {
        // Counts travel as f64, exact below 2^53.
        let parts = self.all_gather(&[count as f64])?;
        Ok(parts.iter().filter_map(|p| p.first().copied()).map(|c| c as usize).sum())
    }
}

/// The trivial group of a single rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfGroup;

impl ProcessGroup for SelfGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> SocResult<()> {
        Ok(())
    }

    fn all_to_all(&self, send: Vec<Vec<f64>>) -> SocResult<Vec<Vec<f64>>> {
        if send.len() != 1 {
            return Err(SocError::DimensionMismatch {
                expected: 1,
                actual: send.len(),
            });
        }
        Ok(send)
    }
}

/// Shared exchange board of a [`LocalGroup`].
#[derive(Debug)]
struct Board {
    /// `slots[src][dst]`, filled by `src` before the first barrier and drained
    /// by `dst` before the second.
    slots: Mutex<Vec<Vec<Vec<f64>>>>,
    barrier: Barrier,
}

/// A group whose ranks are threads of the current process.
///
/// Used to run SPMD code (tests, the driver) without an external launcher.
/// If one rank panics mid-collective the others stay blocked on the board
/// barrier, exactly like a real process group losing a member.
#[derive(Debug, Clone)]
pub struct LocalGroup {
    rank: usize,
    size: usize,
    board: Arc<Board>,
}

impl LocalGroup {
    /// Handles for all ranks of a new group of `size` ranks.
    pub fn create(size: usize) -> SocResult<Vec<LocalGroup>> {
        if size == 0 {
            return Err(SocError::OutOfRange("group size must be at least 1".into()));
        }
        let board = Arc::new(Board {
            slots: Mutex::new(vec![vec![Vec::new(); size]; size]),
            barrier: Barrier::new(size),
        });
        Ok((0..size)
            .map(|rank| LocalGroup {
                rank,
                size,
                board: Arc::clone(&board),
            })
            .collect())
    }

    /// Run `f` on `size` ranks, one thread each, and collect the results in
    /// rank order.
    pub fn run<T, F>(size: usize, f: F) -> SocResult<Vec<T>>
    where
        T: Send,
        F: Fn(&LocalGroup) -> T + Sync,
    {
        let groups = Self::create(size)?;
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = groups
                .iter()
                .map(|group| scope.spawn(move || f(group)))
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .map_err(|_| SocError::Communication(format!("rank {rank} panicked")))
                })
                .collect()
        })
    }

    fn lock_slots(&self) -> SocResult<std::sync::MutexGuard<'_, Vec<Vec<Vec<f64>>>>> {
        self.board
            .slots
            .lock()
            .map_err(|_| SocError::Communication("exchange board poisoned".into()))
    }
}

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> SocResult<()> {
        self.board.barrier.wait();
        Ok(())
    }

    fn all_to_all(&self, send: Vec<Vec<f64>>) -> SocResult<Vec<Vec<f64>>> {
        if send.len() != self.size {
            return Err(SocError::DimensionMismatch {
                expected: self.size,
                actual: send.len(),
            });
        }

        self.lock_slots()?[self.rank] = send;
        self.board.barrier.wait();

        let recv = {
            let mut slots = self.lock_slots()?;
            (0..self.size)
                .map(|src| std::mem::take(&mut slots[src][self.rank]))
                .collect()
        };
        // Nobody may refill a slot row until every rank has drained its column.
        self.board.barrier.wait();
        Ok(recv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_group_collectives() {
        let g = SelfGroup;
        let mut buf = vec![1.0, 2.0];
        g.all_reduce_sum(&mut buf).unwrap();
        assert_eq!(buf, vec![1.0, 2.0]);
        assert_eq!(g.all_reduce_min(3.0).unwrap(), 3.0);
        assert_eq!(g.all_reduce_count(7).unwrap(), 7);
        assert!(g.all_to_all(vec![Vec::new(), Vec::new()]).is_err());
    }

    #[test]
    fn test_local_group_all_to_all() {
        let results = LocalGroup::run(3, |g| {
            let send = (0..g.size())
                .map(|dst| vec![(10 * g.rank() + dst) as f64])
                .collect();
            g.all_to_all(send).unwrap()
        })
        .unwrap();

        for (rank, recv) in results.iter().enumerate() {
            let expected: Vec<Vec<f64>> = (0..3).map(|src| vec![(10 * src + rank) as f64]).collect();
            assert_eq!(recv, &expected);
        }
    }

    #[test]
    fn test_local_group_reductions_agree() {
        let results = LocalGroup::run(4, |g| {
            let mut buf = vec![g.rank() as f64, 1.0];
            g.all_reduce_sum(&mut buf).unwrap();
            let min = g.all_reduce_min(g.rank() as f64 - 1.0).unwrap();
            let max = g.all_reduce_max(g.rank() as f64).unwrap();
            let count = g.all_reduce_count(g.rank()).unwrap();
            g.barrier().unwrap();
            (buf, min, max, count)
        })
        .unwrap();

        for (buf, min, max, count) in results {
            assert_eq!(buf, vec![6.0, 4.0]);
            assert_eq!(min, -1.0);
            assert_eq!(max, 3.0);
            assert_eq!(count, 6);
        }
    }

    #[test]
    fn test_local_group_broadcast() {
        let results = LocalGroup::run(3, |g| {
            let mut buf = if g.rank() == 2 { vec![4.0, 5.0] } else { Vec::new() };
            g.broadcast(2, &mut buf).unwrap();
            let bad = g.broadcast(3, &mut buf.clone());
            (buf, bad.is_err())
        })
        .unwrap();
        for (buf, bad) in results {
            assert_eq!(buf, vec![4.0, 5.0]);
            assert!(bad);
        }
    }

    #[test]
    fn test_local_group_rejects_empty() {
        assert!(LocalGroup::create(0).is_err());
    }
}
