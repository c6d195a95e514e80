//! soc-core: distributed second-order cone operations
//!
//! This library partitions a distributed real vector into disjoint
//! second-order cone (Lorentz cone) blocks and applies the cone's Jordan
//! algebra to every block across a group of cooperating ranks:
//!
//! - **Determinant** and **broadcast** of per-block scalars
//! - **Non-positive count** (blocks not strictly inside the cone)
//! - **Square root**, **Jordan product**, **inverse**
//! - **Quadratic representation** and the **Nesterov-Todd scaling point**
//! - **Maximum step** to the cone boundary along a direction
//!
//! # Layout
//!
//! Blocks may straddle rank boundaries. Each operation reduces every block
//! to a few scalars, combines the partial reductions across the ranks that
//! own the block, and then maps the owned entries locally. The partition
//! descriptor is replicated; vectors are sharded by contiguous ranges.
//!
//! # Example
//!
//! ```ignore
//! use soc_core::{ops, ConePartition, DistVector, LocalGroup};
//!
//! let part = ConePartition::uniform(3, 5)?;
//! let counts = LocalGroup::run(2, |g| {
//!     let s = DistVector::uniform(g, part.len(), 0.0, 0.2, 7)?;
//!     ops::num_non_positive(g, &s, &part, 1000)
//! })?;
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::neg_cmp_op_on_partial_ord)] // NaN-rejecting comparisons

pub mod cones;
pub mod dist;
pub mod error;
pub mod ops;
pub mod partition;
pub mod settings;

// Re-export main types
pub use cones::{ConeFault, SocCone, StepMoments, BOUNDARY_TOL};
pub use dist::{DistVector, Distribution, LocalGroup, ProcessGroup, SelfGroup};
pub use error::{SocError, SocResult};
pub use partition::{Block, ConePartition};
pub use settings::{SocSettings, DEFAULT_CUTOFF};
