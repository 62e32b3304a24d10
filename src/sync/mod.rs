//! Coordination primitives shared by every loop of a pipeline run.
//!
//! `shutdown` holds the one-shot stop flag that ends a run, `stats` the
//! contention accounting a queue keeps for its blocked producers and consumers.
pub mod shutdown;
pub mod stats;
