//! Live variable representation.

use crate::analysis::AbstractValue;
use crate::cfg::{Cfg, NodeId, NodeKind, Symbol};
use std::cmp::Ordering;
use std::fmt;

/// The storage location a read refers to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Place {
    Local(Symbol),
    Field(String),
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Local(symbol) => write!(f, "{symbol}"),
            Self::Field(field) => write!(f, "this.{field}"),
        }
    }
}

/// A live variable, represented by the node that reads it.
///
/// Equality and ordering go through the resolved [`Place`], so killing the
/// target of an assignment removes every read of the same variable from a
/// live set.
#[derive(Debug, Clone)]
pub struct LiveValue {
    node: NodeId,
    place: Place,
}

impl LiveValue {
    /// Wraps a local-variable or field-access node; other node kinds do not
    /// denote a readable place and yield `None`.
    pub fn new(cfg: &Cfg, node: NodeId) -> Option<Self> {
        let place = match cfg.node(node).kind() {
            NodeKind::LocalVariable(symbol) => Place::Local(*symbol),
            NodeKind::FieldAccess { field, .. } => Place::Field(field.clone()),
            _ => return None,
        };
        Some(Self { node, place })
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn place(&self) -> &Place {
        &self.place
    }
}

impl PartialEq for LiveValue {
    fn eq(&self, other: &Self) -> bool {
        self.place == other.place
    }
}

impl Eq for LiveValue {}

impl PartialOrd for LiveValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LiveValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.place.cmp(&other.place)
    }
}

impl fmt::Display for LiveValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.place)
    }
}

impl AbstractValue for LiveValue {
    fn least_upper_bound(&self, _other: &Self) -> Self {
        // Live variables tag identities; the analysis never produces node
        // values, so the solver has nothing to merge.
        unreachable!("least_upper_bound called on a live variable")
    }
}
