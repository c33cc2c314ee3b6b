//! The lattice contracts implemented by analysis clients.

use crate::cfg::NodeId;
use std::fmt;

/// Element of the per-expression join-semilattice tracked by an analysis.
///
/// `least_upper_bound` must be commutative, associative and idempotent;
/// equality is structural, through `PartialEq`.
pub trait AbstractValue: Clone + PartialEq + fmt::Debug {
    fn least_upper_bound(&self, other: &Self) -> Self;
}

/// Element of the per-program-point lattice: the aggregate analysis fact at
/// a location.
///
/// Stores own their data, so `Clone` is the deep copy required before
/// handing a store to a transfer function while keeping the original. The
/// `Display` implementation is the presentation hook; the solvers dump
/// stores through it when tracing.
pub trait Store: Clone + PartialEq + fmt::Debug + fmt::Display + Sized {
    fn least_upper_bound(&self, other: &Self) -> Self;

    /// Upper bound that additionally guarantees stabilization of repeated
    /// application, for lattices with infinite ascending chains. Lattices
    /// of finite height do not need one and return `None`.
    fn widened_upper_bound(&self, _previous: &Self) -> Option<Self> {
        None
    }

    /// Conservative aliasing query for transfer functions.
    fn can_alias(&self, _a: NodeId, _b: NodeId) -> bool {
        true
    }
}
