//! Post-analysis store and value queries.

use crate::analysis::{
    AbstractValue, Direction, Store, TransferFunction, TransferInput, TransferResult,
};
use crate::cfg::{BlockId, BlockKind, Cfg, NodeId, Symbol, TreeId};
use crate::errors::{AnalysisError, FlowResult};
use std::collections::{BTreeMap, BTreeSet};

/// The state a solver retains once it reaches its fixed point, plus the
/// machinery to answer store queries at arbitrary program points by
/// replaying the transfer function across the block that contains the
/// query point.
///
/// Queries take the control flow graph explicitly; the result does not own
/// it. Replays are memoized per block input, so repeated queries into the
/// same block do not rerun the transfer function.
pub struct AnalysisResult<T: TransferFunction> {
    direction: Direction,
    transfer: T,
    node_values: BTreeMap<NodeId, T::Value>,
    /// The final transfer input of every reached block.
    stores: BTreeMap<BlockId, TransferInput<T::Store>>,
    /// Backward only: merged exception store per exception block.
    exception_stores: BTreeMap<BlockId, T::Store>,
    final_local_values: BTreeMap<Symbol, T::Value>,
    /// Forward only: transfer results at return statements.
    return_stores: BTreeMap<NodeId, TransferResult<T::Value, T::Store>>,
    /// Backward only: the store before the entry block.
    entry_store: Option<T::Store>,
    /// Replay memoization, keyed by the block whose final input feeds the
    /// replay.
    caches: BTreeMap<BlockId, BTreeMap<NodeId, TransferResult<T::Value, T::Store>>>,
}

impl<T: TransferFunction> AnalysisResult<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        direction: Direction,
        transfer: T,
        node_values: BTreeMap<NodeId, T::Value>,
        stores: BTreeMap<BlockId, TransferInput<T::Store>>,
        exception_stores: BTreeMap<BlockId, T::Store>,
        final_local_values: BTreeMap<Symbol, T::Value>,
        return_stores: BTreeMap<NodeId, TransferResult<T::Value, T::Store>>,
        entry_store: Option<T::Store>,
    ) -> Self {
        Self {
            direction,
            transfer,
            node_values,
            stores,
            exception_stores,
            final_local_values,
            return_stores,
            entry_store,
            caches: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The abstract value recorded for a node, or `None` if no information
    /// is available.
    pub fn value_of(&self, node: NodeId) -> Option<&T::Value> {
        self.node_values.get(&node)
    }

    /// The abstract value for a source tree: the lub over the values of the
    /// nodes the tree produced.
    pub fn value_of_tree(&self, cfg: &Cfg, tree: TreeId) -> Option<T::Value> {
        let nodes = cfg.nodes_for_tree(tree)?;
        let mut merged: Option<T::Value> = None;
        for &node in nodes {
            if let Some(value) = self.node_values.get(&node) {
                merged = Some(match merged {
                    Some(merged) => merged.least_upper_bound(value),
                    None => value.clone(),
                });
            }
        }
        merged
    }

    /// The values of effectively-final local variables.
    pub fn final_local_values(&self) -> &BTreeMap<Symbol, T::Value> {
        &self.final_local_values
    }

    /// Forward analyses: the transfer results recorded at return
    /// statements.
    pub fn return_statement_stores(&self) -> &BTreeMap<NodeId, TransferResult<T::Value, T::Store>> {
        &self.return_stores
    }

    /// Backward analyses: the store before the entry block.
    pub fn entry_store(&self) -> Option<&T::Store> {
        self.entry_store.as_ref()
    }

    /// The nodes a source tree produced; several nodes can map to one tree.
    pub fn nodes_for_tree<'c>(&self, cfg: &'c Cfg, tree: TreeId) -> Option<&'c BTreeSet<NodeId>> {
        cfg.nodes_for_tree(tree)
    }

    /// The store immediately before a node, or `None` when the node's block
    /// was never reached.
    pub fn store_before(&mut self, cfg: &Cfg, node: NodeId) -> FlowResult<Option<T::Store>> {
        self.run_analysis_for(cfg, node, true)
    }

    /// The store immediately after a node, or `None` when the node's block
    /// was never reached.
    pub fn store_after(&mut self, cfg: &Cfg, node: NodeId) -> FlowResult<Option<T::Store>> {
        self.run_analysis_for(cfg, node, false)
    }

    /// The store immediately before a source tree: the lub over the before
    /// stores of its nodes.
    pub fn store_before_tree(&mut self, cfg: &Cfg, tree: TreeId) -> FlowResult<Option<T::Store>> {
        self.store_at_tree(cfg, tree, true)
    }

    /// The store immediately after a source tree: the lub over the after
    /// stores of its nodes.
    pub fn store_after_tree(&mut self, cfg: &Cfg, tree: TreeId) -> FlowResult<Option<T::Store>> {
        self.store_at_tree(cfg, tree, false)
    }

    /// The regular store immediately before a block.
    pub fn store_before_block(&mut self, cfg: &Cfg, block: BlockId) -> FlowResult<Option<T::Store>> {
        let input = match self.stores.get(&block) {
            Some(input) => input,
            None => return Ok(None),
        };
        match self.direction {
            Direction::Forward => Ok(Some(input.regular_store())),
            Direction::Backward => match cfg.block(block).first_node() {
                Some(first) => self.run_analysis_for(cfg, first, true),
                None => Ok(Some(input.regular_store())),
            },
        }
    }

    /// The regular store immediately after a block.
    pub fn store_after_block(&mut self, cfg: &Cfg, block: BlockId) -> FlowResult<Option<T::Store>> {
        let input = match self.stores.get(&block) {
            Some(input) => input,
            None => return Ok(None),
        };
        match self.direction {
            Direction::Forward => match cfg.block(block).last_node() {
                Some(last) => self.run_analysis_for(cfg, last, false),
                None => Ok(Some(input.regular_store())),
            },
            Direction::Backward => Ok(Some(input.regular_store())),
        }
    }

    /// Merges another result into this one. Both operands must come from
    /// analyses of the same direction.
    pub fn combine(&mut self, other: AnalysisResult<T>) {
        self.node_values.extend(other.node_values);
        self.stores.extend(other.stores);
        self.exception_stores.extend(other.exception_stores);
        self.final_local_values.extend(other.final_local_values);
        self.return_stores.extend(other.return_stores);
        self.caches.extend(other.caches);
        if self.entry_store.is_none() {
            self.entry_store = other.entry_store;
        }
    }

    fn store_at_tree(
        &mut self,
        cfg: &Cfg,
        tree: TreeId,
        before: bool,
    ) -> FlowResult<Option<T::Store>> {
        let nodes = match cfg.nodes_for_tree(tree) {
            Some(nodes) => nodes,
            None => return Ok(None),
        };
        let mut merged: Option<T::Store> = None;
        for &node in nodes {
            if let Some(store) = self.run_analysis_for(cfg, node, before)? {
                merged = Some(match merged {
                    Some(merged) => merged.least_upper_bound(&store),
                    None => store,
                });
            }
        }
        Ok(merged)
    }

    /// Replays the transfer function within the block of `node` and returns
    /// the store right before or after it.
    fn run_analysis_for(
        &mut self,
        cfg: &Cfg,
        node: NodeId,
        before: bool,
    ) -> FlowResult<Option<T::Store>> {
        let block = match cfg.node(node).block() {
            Some(block) => block,
            None => return Err(AnalysisError::NodeOutsideCfg(node)),
        };
        let input = match self.stores.get(&block) {
            Some(input) => input.clone(),
            None => return Ok(None),
        };
        match self.direction {
            Direction::Forward => self.replay_forward(cfg, block, input, node, before),
            Direction::Backward => self.replay_backward(cfg, block, input, node, before),
        }
    }

    fn replay_forward(
        &mut self,
        cfg: &Cfg,
        block: BlockId,
        input: TransferInput<T::Store>,
        node: NodeId,
        before: bool,
    ) -> FlowResult<Option<T::Store>> {
        match cfg.block(block).kind() {
            BlockKind::Regular { contents, .. } => {
                let mut store = input;
                for &n in contents {
                    if n == node && before {
                        return Ok(Some(store.regular_store()));
                    }
                    let result = self.cached_transfer(cfg, block, n, &store)?;
                    if n == node {
                        return Ok(Some(result.regular_store()));
                    }
                    store = result.into_input();
                }
                Err(AnalysisError::NodeNotInBlock(node, block))
            }
            BlockKind::Exception {
                node: block_node, ..
            } => {
                if *block_node != node {
                    return Err(AnalysisError::NodeNotInBlock(node, block));
                }
                if before {
                    return Ok(Some(input.regular_store()));
                }
                let result = self.cached_transfer(cfg, block, node, &input)?;
                Ok(Some(result.regular_store()))
            }
            // Only regular and exception blocks hold nodes.
            BlockKind::Conditional { .. } | BlockKind::Special { .. } => {
                Err(AnalysisError::UnexpectedBlock(block))
            }
        }
    }

    fn replay_backward(
        &mut self,
        cfg: &Cfg,
        block: BlockId,
        input: TransferInput<T::Store>,
        node: NodeId,
        before: bool,
    ) -> FlowResult<Option<T::Store>> {
        match cfg.block(block).kind() {
            BlockKind::Regular { contents, .. } => {
                let mut store = input;
                for &n in contents.iter().rev() {
                    if n == node && !before {
                        return Ok(Some(store.regular_store()));
                    }
                    let result = self.cached_transfer(cfg, block, n, &store)?;
                    if n == node {
                        return Ok(Some(result.regular_store()));
                    }
                    store = result.into_input();
                }
                Err(AnalysisError::NodeNotInBlock(node, block))
            }
            BlockKind::Exception {
                node: block_node, ..
            } => {
                if *block_node != node {
                    return Err(AnalysisError::NodeNotInBlock(node, block));
                }
                if !before {
                    return Ok(Some(input.regular_store()));
                }
                let result = self.cached_transfer(cfg, block, node, &input)?;
                let store = match self.exception_stores.get(&block) {
                    Some(exception_store) => {
                        result.regular_store().least_upper_bound(exception_store)
                    }
                    None => result.regular_store(),
                };
                Ok(Some(store))
            }
            BlockKind::Conditional { .. } | BlockKind::Special { .. } => {
                Err(AnalysisError::UnexpectedBlock(block))
            }
        }
    }

    fn cached_transfer(
        &mut self,
        cfg: &Cfg,
        block: BlockId,
        node: NodeId,
        input: &TransferInput<T::Store>,
    ) -> FlowResult<TransferResult<T::Value, T::Store>> {
        if let Some(result) = self.caches.get(&block).and_then(|cache| cache.get(&node)) {
            return Ok(result.clone());
        }
        // Clone so the cached replay never mutates the retained input.
        let result = self
            .transfer
            .transfer(cfg, node, input.clone())
            .map_err(T::Error::into)?;
        self.caches
            .entry(block)
            .or_default()
            .insert(node, result.clone());
        Ok(result)
    }
}
