//! Core synchronization and framing primitives.
//!
//! - [`packet`]: wire header and fixed-capacity packet slots
//! - [`signal`]: binary signals with multi-wait
//! - [`rendezvous`]: per-stream Produced/Consumed handoff
//! - [`running`]: cooperative shutdown flag
//! - [`types`]: stream identifiers

pub mod packet;
pub mod rendezvous;
pub mod running;
pub mod signal;
pub mod types;
