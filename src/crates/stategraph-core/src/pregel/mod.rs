//! Superstep (Pregel-style) execution
//!
//! Every superstep runs the whole frontier against one immutable snapshot, merges
//! the completed updates in node declaration order, checkpoints, and routes to the
//! next frontier. See [`loop_impl`] for the step sequence.

pub(crate) mod algo;
pub(crate) mod loop_impl;

pub(crate) use loop_impl::{PregelLoop, Start};
