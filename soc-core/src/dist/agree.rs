//! Collective agreement on per-block failures.
//!
//! A failing block may live on a single rank, while its peers completed the
//! same operation. Before any result is returned, every rank publishes its
//! lowest failing block and all ranks raise the same error.

use super::group::ProcessGroup;
use crate::cones::ConeFault;
use crate::error::SocResult;

/// Which argument of an operation a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    X,
    S,
    Z,
}

impl Operand {
    const ALL: [Operand; 3] = [Operand::X, Operand::S, Operand::Z];

    pub fn name(self) -> &'static str {
        match self {
            Operand::X => "x",
            Operand::S => "s",
            Operand::Z => "z",
        }
    }

    fn code(self) -> f64 {
        Self::ALL.iter().position(|&o| o == self).unwrap_or(0) as f64
    }

    fn from_code(code: f64) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

/// A failure on the block starting at `first`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockFailure {
    pub first: usize,
    pub operand: Operand,
    pub fault: ConeFault,
}

impl BlockFailure {
    /// Wire form: `[first, operand, fault, det]`.
    fn encode(&self) -> [f64; 4] {
        let (code, det) = match self.fault {
            ConeFault::OutsideCone => (0.0, 0.0),
            ConeFault::NotInterior => (1.0, 0.0),
            ConeFault::Singular { det } => (2.0, det),
            ConeFault::NonFinite => (3.0, 0.0),
        };
        [self.first as f64, self.operand.code(), code, det]
    }

    fn decode(msg: &[f64]) -> Option<Self> {
        let &[first, operand, code, det] = msg else {
            return None;
        };
        let fault = match code as u8 {
            0 => ConeFault::OutsideCone,
            1 => ConeFault::NotInterior,
            2 => ConeFault::Singular { det },
            3 => ConeFault::NonFinite,
            _ => return None,
        };
        Some(Self {
            first: first as usize,
            operand: Operand::from_code(operand)?,
            fault,
        })
    }
}

/// Agree on the lowest failing block across the group (collective).
///
/// Every rank returns `Ok(())` or the same error.
pub fn agree<G: ProcessGroup>(group: &G, local: Option<BlockFailure>) -> SocResult<()> {
    let msg = local.map(|f| f.encode().to_vec()).unwrap_or_default();
    let all = group.all_gather(&msg)?;

    let lowest = all
        .iter()
        .filter_map(|m| BlockFailure::decode(m))
        .min_by_key(|f| f.first);

    match lowest {
        None => Ok(()),
        Some(failure) => {
            if group.rank() == 0 {
                log::warn!(
                    "cone operation failed on block {} ({}: {})",
                    failure.first,
                    failure.operand.name(),
                    failure.fault
                );
            }
            Err(failure.fault.at(failure.first, failure.operand.name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dist::group::{LocalGroup, SelfGroup};
    use crate::error::SocError;

    #[test]
    fn test_no_failure() {
        assert!(agree(&SelfGroup, None).is_ok());
    }

    #[test]
    fn test_lowest_block_wins_everywhere() {
        let results = LocalGroup::run(3, |g| {
            let local = match g.rank() {
                0 => None,
                1 => Some(BlockFailure {
                    first: 12,
                    operand: Operand::S,
                    fault: ConeFault::OutsideCone,
                }),
                _ => Some(BlockFailure {
                    first: 7,
                    operand: Operand::X,
                    fault: ConeFault::Singular { det: 0.0 },
                }),
            };
            agree(g, local)
        })
        .unwrap();

        for r in results {
            assert_eq!(r, Err(SocError::Singular { first: 7, det: 0.0 }));
        }
    }

    #[test]
    fn test_wire_form_roundtrip() {
        let failure = BlockFailure {
            first: 40,
            operand: Operand::Z,
            fault: ConeFault::NotInterior,
        };
        assert_eq!(BlockFailure::decode(&failure.encode()), Some(failure));
        assert_eq!(BlockFailure::decode(&[]), None);
        assert_eq!(BlockFailure::decode(&[0.0, 3.0, 0.0, 0.0]), None);
    }

    #[test]
    fn test_non_finite_direction_agreed() {
        let results = LocalGroup::run(2, |g| {
            let local = (g.rank() == 1).then_some(BlockFailure {
                first: 3,
                operand: Operand::Z,
                fault: ConeFault::NonFinite,
            });
            agree(g, local)
        })
        .unwrap();

        for r in results {
            assert_eq!(
                r,
                Err(SocError::Domain {
                    first: 3,
                    reason: "z is not finite".into()
                })
            );
        }
    }
}
