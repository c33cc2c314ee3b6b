//! Generic worklist-based dataflow fixpoint solving.
//!
//! An analysis is a lattice of stores and values ([`Store`],
//! [`AbstractValue`]), a transfer function dispatched on graph nodes, and a
//! direction. [`ForwardAnalysis`] and [`BackwardAnalysis`] run the transfer
//! function to a fixed point over a [`crate::cfg::Cfg`]; the retained state
//! then becomes an [`AnalysisResult`] answering store queries at arbitrary
//! program points.

mod backward;
mod forward;
mod lattice;
mod result;
mod transfer;
mod worklist;

pub use backward::BackwardAnalysis;
pub use forward::ForwardAnalysis;
pub use lattice::{AbstractValue, Store};
pub use result::AnalysisResult;
pub use transfer::{
    BackwardTransferFunction, FlowRule, ForwardTransferFunction, TransferFunction, TransferInput,
    TransferResult,
};

use crate::cfg::{Cfg, NodeId, NodeKind, Symbol};
use std::collections::BTreeMap;

/// The direction an analysis propagates stores in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Records the value a transfer produced for a node, merging with any
/// previous value by lub. Returns whether the recorded value changed or the
/// transfer reported an in-place store mutation, i.e. whether the block must
/// be revisited.
pub(crate) fn update_node_values<V: AbstractValue>(
    node_values: &mut BTreeMap<NodeId, V>,
    node: NodeId,
    value: Option<&V>,
    store_changed: bool,
) -> bool {
    let mut value_changed = false;
    if let Some(new) = value {
        let merged = match node_values.get(&node) {
            Some(old) => old.least_upper_bound(new),
            None => new.clone(),
        };
        value_changed = node_values.get(&node) != Some(&merged);
        node_values.insert(node, merged);
    }
    value_changed || store_changed
}

/// Keeps the last value assigned to an effectively-final local variable.
pub(crate) fn record_final_local<V: AbstractValue>(
    cfg: &Cfg,
    final_local_values: &mut BTreeMap<Symbol, V>,
    node: NodeId,
    value: Option<&V>,
) {
    let value = match value {
        Some(value) => value,
        None => return,
    };
    if let NodeKind::Assignment { target, .. } = cfg.node(node).kind() {
        if let NodeKind::LocalVariable(symbol) = cfg.node(*target).kind() {
            if cfg.local(*symbol).effectively_final {
                final_local_values.insert(*symbol, value.clone());
            }
        }
    }
}
