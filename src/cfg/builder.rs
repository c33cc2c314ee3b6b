//! Programmatic assembly of control flow graphs.

use crate::analysis::FlowRule;
use crate::cfg::{
    Block, BlockId, BlockKind, Cfg, Edge, ExceptionTag, Local, Node, NodeId, NodeKind,
    SpecialKind, Symbol, TreeId, UnderlyingAst,
};
use crate::errors::{AnalysisError, FlowResult};
use petgraph::graph::DiGraph;
use std::collections::{BTreeMap, BTreeSet};

/// Assembles a [`Cfg`] block by block.
///
/// The three special blocks always exist: they are created upfront and a
/// graph without edges into an exit simply leaves that exit unreachable.
/// Flow rules default to [`FlowRule::EachToEach`], except on conditional
/// blocks which split their stores onto their two edges.
pub struct CfgBuilder {
    graph: DiGraph<Block, Edge>,
    nodes: Vec<Node>,
    locals: Vec<Local>,
    tree_lookup: BTreeMap<TreeId, BTreeSet<NodeId>>,
    next_tree: u32,
    entry: BlockId,
    regular_exit: BlockId,
    exceptional_exit: BlockId,
    return_nodes: Vec<NodeId>,
    ast: UnderlyingAst,
}

impl CfgBuilder {
    pub fn new(ast: UnderlyingAst) -> Self {
        let mut graph = DiGraph::new();
        let entry = BlockId(graph.add_node(Block {
            kind: BlockKind::Special {
                kind: SpecialKind::Entry,
                flow_rule: FlowRule::EachToEach,
            },
        }));
        let regular_exit = BlockId(graph.add_node(Block {
            kind: BlockKind::Special {
                kind: SpecialKind::Exit,
                flow_rule: FlowRule::EachToEach,
            },
        }));
        let exceptional_exit = BlockId(graph.add_node(Block {
            kind: BlockKind::Special {
                kind: SpecialKind::ExceptionalExit,
                flow_rule: FlowRule::EachToEach,
            },
        }));
        Self {
            graph,
            nodes: Vec::new(),
            locals: Vec::new(),
            tree_lookup: BTreeMap::new(),
            next_tree: 0,
            entry,
            regular_exit,
            exceptional_exit,
            return_nodes: Vec::new(),
            ast,
        }
    }

    #[inline]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    #[inline]
    pub fn regular_exit(&self) -> BlockId {
        self.regular_exit
    }

    #[inline]
    pub fn exceptional_exit(&self) -> BlockId {
        self.exceptional_exit
    }

    /// Declares a local variable.
    pub fn local(&mut self, name: impl Into<String>) -> Symbol {
        let symbol = Symbol(self.locals.len() as u32);
        self.locals.push(Local {
            name: name.into(),
            effectively_final: false,
        });
        symbol
    }

    /// Declares a local variable that is never reassigned.
    pub fn effectively_final_local(&mut self, name: impl Into<String>) -> Symbol {
        let symbol = self.local(name);
        self.locals[symbol.0 as usize].effectively_final = true;
        symbol
    }

    /// Declares a local that is also a formal parameter of the unit. For an
    /// arbitrary code block this is a plain local.
    pub fn parameter(&mut self, name: impl Into<String>) -> Symbol {
        let symbol = self.local(name);
        match &mut self.ast {
            UnderlyingAst::Method { parameters } | UnderlyingAst::Lambda { parameters } => {
                parameters.push(symbol);
            }
            UnderlyingAst::ArbitraryCode => (),
        }
        symbol
    }

    /// Creates a node without a source tree.
    pub fn node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            id,
            block: None,
            tree: None,
            kind,
        });
        id
    }

    /// Allocates a fresh source tree identity.
    pub fn tree(&mut self) -> TreeId {
        let tree = TreeId(self.next_tree);
        self.next_tree += 1;
        tree
    }

    /// Creates a node attached to the given source tree.
    pub fn node_in_tree(&mut self, kind: NodeKind, tree: TreeId) -> NodeId {
        let id = self.node(kind);
        self.nodes[id.0 as usize].tree = Some(tree);
        self.tree_lookup.entry(tree).or_default().insert(id);
        id
    }

    /// Creates a regular block holding the given nodes in program order.
    pub fn regular_block(&mut self, contents: Vec<NodeId>) -> FlowResult<BlockId> {
        if contents.is_empty() {
            return Err(AnalysisError::EmptyRegularBlock);
        }
        let block = BlockId(self.graph.add_node(Block {
            kind: BlockKind::Regular {
                contents: contents.clone(),
                flow_rule: FlowRule::EachToEach,
            },
        }));
        for node in contents {
            self.place(node, block);
        }
        Ok(block)
    }

    /// Creates a conditional block. Its then edge forwards the then store
    /// to both sides of the successor and symmetrically for the else edge,
    /// which is what a freshly split condition wants; override with
    /// [`Self::set_then_flow_rule`] / [`Self::set_else_flow_rule`].
    pub fn conditional_block(&mut self) -> BlockId {
        BlockId(self.graph.add_node(Block {
            kind: BlockKind::Conditional {
                then_flow_rule: FlowRule::ThenToBoth,
                else_flow_rule: FlowRule::ElseToBoth,
            },
        }))
    }

    pub fn exception_block(&mut self, node: NodeId) -> BlockId {
        let block = BlockId(self.graph.add_node(Block {
            kind: BlockKind::Exception {
                node,
                flow_rule: FlowRule::EachToEach,
            },
        }));
        self.place(node, block);
        block
    }

    /// Sets the flow rule of a regular, exception or special block.
    pub fn set_flow_rule(&mut self, block: BlockId, rule: FlowRule) -> FlowResult<()> {
        match &mut self.graph[block.index()].kind {
            BlockKind::Regular { flow_rule, .. }
            | BlockKind::Exception { flow_rule, .. }
            | BlockKind::Special { flow_rule, .. } => {
                *flow_rule = rule;
                Ok(())
            }
            BlockKind::Conditional { .. } => Err(AnalysisError::UnexpectedBlock(block)),
        }
    }

    pub fn set_then_flow_rule(&mut self, block: BlockId, rule: FlowRule) -> FlowResult<()> {
        match &mut self.graph[block.index()].kind {
            BlockKind::Conditional { then_flow_rule, .. } => {
                *then_flow_rule = rule;
                Ok(())
            }
            _ => Err(AnalysisError::UnexpectedBlock(block)),
        }
    }

    pub fn set_else_flow_rule(&mut self, block: BlockId, rule: FlowRule) -> FlowResult<()> {
        match &mut self.graph[block.index()].kind {
            BlockKind::Conditional { else_flow_rule, .. } => {
                *else_flow_rule = rule;
                Ok(())
            }
            _ => Err(AnalysisError::UnexpectedBlock(block)),
        }
    }

    /// Adds the unique non-exceptional successor edge.
    pub fn edge(&mut self, from: BlockId, to: BlockId) {
        self.graph.add_edge(from.index(), to.index(), Edge::Regular);
    }

    pub fn then_edge(&mut self, from: BlockId, to: BlockId) {
        self.graph.add_edge(from.index(), to.index(), Edge::Then);
    }

    pub fn else_edge(&mut self, from: BlockId, to: BlockId) {
        self.graph.add_edge(from.index(), to.index(), Edge::Else);
    }

    pub fn exception_edge(&mut self, from: BlockId, to: BlockId, tag: ExceptionTag) {
        self.graph
            .add_edge(from.index(), to.index(), Edge::Exception(tag));
    }

    pub fn finish(self) -> Cfg {
        Cfg {
            graph: self.graph,
            nodes: self.nodes,
            locals: self.locals,
            tree_lookup: self.tree_lookup,
            entry: self.entry,
            regular_exit: self.regular_exit,
            exceptional_exit: self.exceptional_exit,
            return_nodes: self.return_nodes,
            ast: self.ast,
        }
    }

    fn place(&mut self, node: NodeId, block: BlockId) {
        let node = &mut self.nodes[node.0 as usize];
        node.block = Some(block);
        if matches!(node.kind, NodeKind::Return { .. }) && !self.return_nodes.contains(&node.id) {
            self.return_nodes.push(node.id);
        }
    }
}
