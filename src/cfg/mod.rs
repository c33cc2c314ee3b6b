//! Control flow graph representation.
//!
//! The engine consumes an already-built graph: basic blocks as graph nodes,
//! labeled edges for sequential, conditional and exceptional control flow,
//! and an arena of the program nodes the blocks carry. Graphs are assembled
//! with [`CfgBuilder`] and immutable afterwards.

mod block;
mod builder;
mod node;

pub use block::{Block, BlockId, BlockKind, Edge, SpecialKind};
pub use builder::CfgBuilder;
pub use node::{BinaryOp, Local, Node, NodeId, NodeKind, Symbol, TreeId, UnaryOp};

use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Cause label of an exceptional edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExceptionTag(String);

impl ExceptionTag {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExceptionTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of program unit the graph was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnderlyingAst {
    Method { parameters: Vec<Symbol> },
    Lambda { parameters: Vec<Symbol> },
    ArbitraryCode,
}

impl UnderlyingAst {
    /// Formal parameters of the unit; empty for arbitrary code blocks.
    pub fn parameters(&self) -> &[Symbol] {
        match self {
            Self::Method { parameters } | Self::Lambda { parameters } => parameters,
            Self::ArbitraryCode => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cfg {
    pub(crate) graph: DiGraph<Block, Edge>,
    nodes: Vec<Node>,
    locals: Vec<Local>,
    tree_lookup: BTreeMap<TreeId, BTreeSet<NodeId>>,
    entry: BlockId,
    regular_exit: BlockId,
    exceptional_exit: BlockId,
    return_nodes: Vec<NodeId>,
    ast: UnderlyingAst,
}

impl Cfg {
    #[inline]
    pub fn entry_block(&self) -> BlockId {
        self.entry
    }

    #[inline]
    pub fn regular_exit_block(&self) -> BlockId {
        self.regular_exit
    }

    #[inline]
    pub fn exceptional_exit_block(&self) -> BlockId {
        self.exceptional_exit
    }

    /// Return nodes of the unit, in the order they were placed in blocks.
    #[inline]
    pub fn return_nodes(&self) -> &[NodeId] {
        &self.return_nodes
    }

    #[inline]
    pub fn underlying_ast(&self) -> &UnderlyingAst {
        &self.ast
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.graph[id.index()]
    }

    #[inline]
    pub fn local(&self, symbol: Symbol) -> &Local {
        &self.locals[symbol.0 as usize]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.graph.node_indices().map(BlockId)
    }

    /// Nodes originating from the given source tree.
    pub fn nodes_for_tree(&self, tree: TreeId) -> Option<&BTreeSet<NodeId>> {
        self.tree_lookup.get(&tree)
    }

    pub(crate) fn is_return_node(&self, node: NodeId) -> bool {
        self.return_nodes.contains(&node)
    }

    /// The unique non-exceptional successor, if any.
    pub fn successor(&self, block: BlockId) -> Option<BlockId> {
        self.graph
            .edges(block.index())
            .find(|e| matches!(e.weight(), Edge::Regular))
            .map(|e| BlockId(e.target()))
    }

    pub fn then_successor(&self, block: BlockId) -> Option<BlockId> {
        self.graph
            .edges(block.index())
            .find(|e| matches!(e.weight(), Edge::Then))
            .map(|e| BlockId(e.target()))
    }

    pub fn else_successor(&self, block: BlockId) -> Option<BlockId> {
        self.graph
            .edges(block.index())
            .find(|e| matches!(e.weight(), Edge::Else))
            .map(|e| BlockId(e.target()))
    }

    /// Exceptional successors of an exception block, grouped by cause.
    pub fn exceptional_successors(
        &self,
        block: BlockId,
    ) -> BTreeMap<ExceptionTag, BTreeSet<BlockId>> {
        let mut successors: BTreeMap<ExceptionTag, BTreeSet<BlockId>> = BTreeMap::new();
        for edge in self.graph.edges(block.index()) {
            if let Edge::Exception(tag) = edge.weight() {
                successors
                    .entry(tag.clone())
                    .or_default()
                    .insert(BlockId(edge.target()));
            }
        }
        successors
    }

    pub(crate) fn is_exceptional_successor(&self, block: BlockId, successor: BlockId) -> bool {
        self.graph
            .edges(block.index())
            .any(|e| matches!(e.weight(), Edge::Exception(_)) && e.target() == successor.index())
    }

    /// Distinct predecessor blocks (parallel edges count once).
    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        let unique: BTreeSet<BlockId> = self
            .graph
            .neighbors_directed(block.index(), Direction::Incoming)
            .map(BlockId)
            .collect();
        unique.into_iter().collect()
    }
}
