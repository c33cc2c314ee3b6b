//! This crate provides a generic dataflow analysis engine over control flow
//! graphs of method-like program units.
//!
//! Clients supply three things: a graph built with
//! [`cfg::CfgBuilder`], lattice implementations of
//! [`analysis::Store`] and [`analysis::AbstractValue`], and a transfer
//! function dispatched on node variants. [`analysis::ForwardAnalysis`] and
//! [`analysis::BackwardAnalysis`] run the transfer function to a fixed
//! point; the resulting [`analysis::AnalysisResult`] answers store and
//! value queries at every program point by replaying transfers on demand.
//!
//! The [`liveness`] module is a complete client: a backward live variable
//! analysis whose store is the set of variables still read downstream.

pub mod analysis;
pub mod cfg;
pub mod errors;
pub mod liveness;

use crate::errors::FlowResult;

/// Runs a live variable analysis onto the given control flow graph.
///
/// # Errors
///
/// This function may generate errors of the underlying backward solver,
/// e.g. when neither exit block of the graph is reachable.
pub fn live_variables(cfg: &cfg::Cfg) -> FlowResult<liveness::Liveness> {
    liveness::Liveness::compute(cfg)
}
