//! Block worklist ordered by depth-first numbering.

use crate::analysis::Direction;
use crate::cfg::{BlockId, Cfg};
use petgraph::visit::DfsPostOrder;
use std::collections::{BTreeMap, BTreeSet};

/// Priority worklist with set semantics: a block is queued at most once and
/// blocks are dequeued in reverse postorder (forward analyses) or postorder
/// (backward analyses) of a depth-first traversal from the entry block.
///
/// The depth-first-order map doubles as the reachability oracle: a block
/// missing from it was not reached from the entry.
#[derive(Debug)]
pub(crate) struct Worklist {
    direction: Direction,
    depth_first_order: BTreeMap<BlockId, usize>,
    queue: BTreeSet<(usize, BlockId)>,
}

impl Worklist {
    pub(crate) fn new(direction: Direction) -> Self {
        Self {
            direction,
            depth_first_order: BTreeMap::new(),
            queue: BTreeSet::new(),
        }
    }

    /// Numbers the blocks of `cfg` for the configured direction and resets
    /// the queue.
    pub(crate) fn process(&mut self, cfg: &Cfg) {
        self.depth_first_order.clear();
        self.queue.clear();
        let mut postorder = Vec::new();
        let mut dfs = DfsPostOrder::new(&cfg.graph, cfg.entry_block().index());
        while let Some(index) = dfs.next(&cfg.graph) {
            postorder.push(BlockId(index));
        }
        match self.direction {
            Direction::Forward => {
                for (i, block) in postorder.iter().rev().enumerate() {
                    self.depth_first_order.insert(*block, i);
                }
            }
            Direction::Backward => {
                for (i, block) in postorder.iter().enumerate() {
                    self.depth_first_order.insert(*block, i);
                }
            }
        }
    }

    /// Whether the block was reached by the depth-first traversal.
    pub(crate) fn is_reachable(&self, block: BlockId) -> bool {
        self.depth_first_order.contains_key(&block)
    }

    /// Queues a block. Blocks without a number are unreachable from the
    /// entry (e.g. dead predecessors of an exit block met by a backward
    /// analysis) and are dropped: they can contribute nothing.
    pub(crate) fn add(&mut self, block: BlockId) {
        if let Some(&order) = self.depth_first_order.get(&block) {
            self.queue.insert((order, block));
        }
    }

    pub(crate) fn pop(&mut self) -> Option<BlockId> {
        self.queue.pop_first().map(|(_, block)| block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{CfgBuilder, NodeKind, UnderlyingAst};

    /// entry -> a -> cond -> (b | c) -> d -> exit
    fn diamond() -> (Cfg, BlockId, BlockId, BlockId, BlockId, BlockId) {
        let mut builder = CfgBuilder::new(UnderlyingAst::ArbitraryCode);
        let x = builder.local("x");
        let nodes: Vec<_> = (0..4)
            .map(|_| builder.node(NodeKind::LocalVariable(x)))
            .collect();
        let a = builder.regular_block(vec![nodes[0]]).unwrap();
        let cond = builder.conditional_block();
        let b = builder.regular_block(vec![nodes[1]]).unwrap();
        let c = builder.regular_block(vec![nodes[2]]).unwrap();
        let d = builder.regular_block(vec![nodes[3]]).unwrap();
        builder.edge(builder.entry(), a);
        builder.edge(a, cond);
        builder.then_edge(cond, b);
        builder.else_edge(cond, c);
        builder.edge(b, d);
        builder.edge(c, d);
        builder.edge(d, builder.regular_exit());
        let cfg = builder.finish();
        (cfg, a, cond, b, c, d)
    }

    #[test]
    fn forward_order_starts_at_entry_and_respects_dominance() {
        let (cfg, a, cond, b, c, d) = diamond();
        let mut worklist = Worklist::new(Direction::Forward);
        worklist.process(&cfg);
        for block in [cfg.entry_block(), a, cond, b, c, d, cfg.regular_exit_block()] {
            worklist.add(block);
        }
        let mut popped = Vec::new();
        while let Some(block) = worklist.pop() {
            popped.push(block);
        }
        assert_eq!(popped.first(), Some(&cfg.entry_block()));
        assert_eq!(popped.last(), Some(&cfg.regular_exit_block()));
        let position = |x: BlockId| popped.iter().position(|&p| p == x).unwrap();
        assert!(position(a) < position(cond));
        assert!(position(cond) < position(b));
        assert!(position(cond) < position(c));
        assert!(position(b) < position(d));
        assert!(position(c) < position(d));
    }

    #[test]
    fn backward_order_starts_at_the_exit() {
        let (cfg, a, _, _, _, d) = diamond();
        let mut worklist = Worklist::new(Direction::Backward);
        worklist.process(&cfg);
        for block in [cfg.entry_block(), a, d, cfg.regular_exit_block()] {
            worklist.add(block);
        }
        assert_eq!(worklist.pop(), Some(cfg.regular_exit_block()));
        let mut rest = Vec::new();
        while let Some(block) = worklist.pop() {
            rest.push(block);
        }
        assert_eq!(rest.last(), Some(&cfg.entry_block()));
        let position = |x: BlockId| rest.iter().position(|&p| p == x).unwrap();
        assert!(position(d) < position(a));
    }

    #[test]
    fn a_block_is_queued_at_most_once() {
        let (cfg, a, ..) = diamond();
        let mut worklist = Worklist::new(Direction::Forward);
        worklist.process(&cfg);
        worklist.add(a);
        worklist.add(a);
        assert_eq!(worklist.pop(), Some(a));
        assert_eq!(worklist.pop(), None);
    }

    #[test]
    fn unreachable_blocks_are_not_numbered() {
        let mut builder = CfgBuilder::new(UnderlyingAst::ArbitraryCode);
        let x = builder.local("x");
        let read = builder.node(NodeKind::LocalVariable(x));
        let island = builder.regular_block(vec![read]).unwrap();
        builder.edge(builder.entry(), builder.regular_exit());
        let cfg = builder.finish();
        let mut worklist = Worklist::new(Direction::Forward);
        worklist.process(&cfg);
        assert!(worklist.is_reachable(cfg.entry_block()));
        assert!(!worklist.is_reachable(island));
        assert!(!worklist.is_reachable(cfg.exceptional_exit_block()));
        worklist.add(island);
        assert_eq!(worklist.pop(), None);
    }
}
