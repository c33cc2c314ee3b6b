//! Basic block taxonomy.

use crate::analysis::FlowRule;
use crate::cfg::{ExceptionTag, NodeId};
use petgraph::graph::NodeIndex;
use std::fmt;

/// Identity of a basic block, backed by its index in the block graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub(crate) NodeIndex);

impl BlockId {
    #[inline]
    pub(crate) fn index(self) -> NodeIndex {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "b{}", self.0.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    Entry,
    Exit,
    ExceptionalExit,
}

#[derive(Debug, Clone)]
pub enum BlockKind {
    /// Ordered sequence of nodes with a single successor.
    Regular {
        contents: Vec<NodeId>,
        flow_rule: FlowRule,
    },
    /// No nodes; a `then` and an `else` successor, each with its own rule.
    Conditional {
        then_flow_rule: FlowRule,
        else_flow_rule: FlowRule,
    },
    /// Exactly one node that may complete abruptly; one normal successor
    /// plus per-exception-tag successor sets on the outgoing edges.
    Exception { node: NodeId, flow_rule: FlowRule },
    /// Entry and exit markers; no nodes.
    Special {
        kind: SpecialKind,
        flow_rule: FlowRule,
    },
}

#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) kind: BlockKind,
}

impl Block {
    #[inline]
    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    /// First node in program order, if the block holds any.
    pub fn first_node(&self) -> Option<NodeId> {
        match &self.kind {
            BlockKind::Regular { contents, .. } => contents.first().copied(),
            BlockKind::Exception { node, .. } => Some(*node),
            BlockKind::Conditional { .. } | BlockKind::Special { .. } => None,
        }
    }

    /// Last node in program order, if the block holds any.
    pub fn last_node(&self) -> Option<NodeId> {
        match &self.kind {
            BlockKind::Regular { contents, .. } => contents.last().copied(),
            BlockKind::Exception { node, .. } => Some(*node),
            BlockKind::Conditional { .. } | BlockKind::Special { .. } => None,
        }
    }
}

/// Edge labels of the block graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edge {
    /// The unique successor edge of regular, exception and special blocks.
    Regular,
    Then,
    Else,
    /// Exceptional edge of an exception block, labeled with its cause.
    Exception(ExceptionTag),
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Regular => write!(f, "<seq>"),
            Self::Then => write!(f, "<then>"),
            Self::Else => write!(f, "<else>"),
            Self::Exception(tag) => write!(f, "<throw {tag}>"),
        }
    }
}
