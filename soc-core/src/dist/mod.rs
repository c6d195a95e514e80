//! Distributed dispatch layer.
//!
//! - [`group`]: process groups and collectives
//! - [`layout`]: contiguous ownership of global indices
//! - [`vector`]: distributed vectors
//! - [`exchange`]: combining per-block reductions across ranks
//! - [`agree`]: collective agreement on block failures

pub mod agree;
pub mod exchange;
pub mod group;
pub mod layout;
pub mod vector;

pub use agree::{agree, BlockFailure, Operand};
pub use exchange::{BlockExchange, LocalBlock};
pub use group::{LocalGroup, ProcessGroup, SelfGroup};
pub use layout::Distribution;
pub use vector::DistVector;
