//! Cone kernel implementations.
//!
//! Only the second-order cone is provided. Its kernels work on one
//! contiguous block at a time; the distributed operations in [`crate::ops`]
//! reuse the same scalar helpers on block reductions.

pub mod soc;

pub use soc::{ConeFault, SocCone, StepMoments, BOUNDARY_TOL};
