//! Live variable analysis.
//!
//! A backward analysis whose store is the set of variables read further
//! down the control flow. Assignments kill their target and gen the uses
//! of their right-hand side; both exits start with nothing live.

mod store;
mod transfer;
mod value;

pub use store::LiveStore;
pub use transfer::LivenessTransfer;
pub use value::{LiveValue, Place};

use crate::analysis::{AnalysisResult, BackwardAnalysis};
use crate::cfg::Cfg;
use crate::errors::FlowResult;

/// Result of the live variable pass.
pub type Liveness = AnalysisResult<LivenessTransfer>;

impl Liveness {
    /// Runs a live variable analysis onto the given control flow graph and
    /// returns the queryable fixpoint.
    ///
    /// # Errors
    ///
    /// This function may generate errors of the underlying backward solver,
    /// e.g. when neither exit block is reachable.
    pub fn compute(cfg: &Cfg) -> FlowResult<Self> {
        let mut analysis = BackwardAnalysis::new(LivenessTransfer);
        analysis.perform_analysis(cfg)?;
        Ok(analysis.into_result())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{
        BinaryOp, CfgBuilder, NodeId, NodeKind, Symbol, TreeId, UnderlyingAst,
    };

    fn live_set(store: &LiveStore) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = store
            .iter()
            .map(|value| match value.place() {
                Place::Local(symbol) => *symbol,
                Place::Field(field) => panic!("unexpected live field {field}"),
            })
            .collect();
        symbols.sort_unstable();
        symbols
    }

    struct Sum {
        cfg: Cfg,
        a: Symbol,
        b: Symbol,
        c: Symbol,
        assign_tree: TreeId,
        return_tree: TreeId,
    }

    /// int m(int a, int b) { int c = a + b; return c; }
    fn sum_method() -> Sum {
        let mut builder = CfgBuilder::new(UnderlyingAst::Method { parameters: vec![] });
        let a = builder.parameter("a");
        let b = builder.parameter("b");
        let c = builder.local("c");
        let assign_tree = builder.tree();
        let return_tree = builder.tree();
        let read_a = builder.node_in_tree(NodeKind::LocalVariable(a), assign_tree);
        let read_b = builder.node_in_tree(NodeKind::LocalVariable(b), assign_tree);
        let sum = builder.node_in_tree(
            NodeKind::BinaryOperation {
                op: BinaryOp::Add,
                left: read_a,
                right: read_b,
            },
            assign_tree,
        );
        let target = builder.node_in_tree(NodeKind::LocalVariable(c), assign_tree);
        let assign = builder.node_in_tree(
            NodeKind::Assignment {
                target,
                expression: sum,
            },
            assign_tree,
        );
        let read_c = builder.node_in_tree(NodeKind::LocalVariable(c), return_tree);
        let ret = builder.node_in_tree(NodeKind::Return { result: Some(read_c) }, return_tree);
        let body = builder
            .regular_block(vec![read_a, read_b, sum, target, assign, read_c, ret])
            .unwrap();
        builder.edge(builder.entry(), body);
        builder.edge(body, builder.regular_exit());
        Sum {
            cfg: builder.finish(),
            a,
            b,
            c,
            assign_tree,
            return_tree,
        }
    }

    #[test]
    fn straight_line_defs_and_uses() {
        let m = sum_method();
        let mut result = Liveness::compute(&m.cfg).unwrap();

        let before_return = result
            .store_before_tree(&m.cfg, m.return_tree)
            .unwrap()
            .unwrap();
        assert_eq!(live_set(&before_return), vec![m.c]);

        let before_assign = result
            .store_before_tree(&m.cfg, m.assign_tree)
            .unwrap()
            .unwrap();
        assert_eq!(live_set(&before_assign), vec![m.a, m.b]);

        let entry = result.entry_store().unwrap();
        assert_eq!(live_set(entry), vec![m.a, m.b]);
    }

    /// int m(int x) { x = x + 1; return x; }
    #[test]
    fn rhs_use_survives_redefinition_of_the_same_variable() {
        let mut builder = CfgBuilder::new(UnderlyingAst::Method { parameters: vec![] });
        let x = builder.parameter("x");
        let assign_tree = builder.tree();
        let return_tree = builder.tree();
        let read_x = builder.node_in_tree(NodeKind::LocalVariable(x), assign_tree);
        let one = builder.node_in_tree(NodeKind::IntegerLiteral(1), assign_tree);
        let sum = builder.node_in_tree(
            NodeKind::BinaryOperation {
                op: BinaryOp::Add,
                left: read_x,
                right: one,
            },
            assign_tree,
        );
        let target = builder.node_in_tree(NodeKind::LocalVariable(x), assign_tree);
        let assign = builder.node_in_tree(
            NodeKind::Assignment {
                target,
                expression: sum,
            },
            assign_tree,
        );
        let read_again = builder.node_in_tree(NodeKind::LocalVariable(x), return_tree);
        let ret = builder.node_in_tree(
            NodeKind::Return {
                result: Some(read_again),
            },
            return_tree,
        );
        let body = builder
            .regular_block(vec![read_x, one, sum, target, assign, read_again, ret])
            .unwrap();
        builder.edge(builder.entry(), body);
        builder.edge(body, builder.regular_exit());
        let cfg = builder.finish();

        let mut result = Liveness::compute(&cfg).unwrap();
        let before_return = result.store_before_tree(&cfg, return_tree).unwrap().unwrap();
        assert_eq!(live_set(&before_return), vec![x]);
        let before_assign = result.store_before_tree(&cfg, assign_tree).unwrap().unwrap();
        assert_eq!(live_set(&before_assign), vec![x]);
        let entry = result.entry_store().unwrap();
        assert_eq!(live_set(entry), vec![x]);
    }

    /// int m(int a, int b) { if (a > 0) return a; return b; }
    #[test]
    fn branches_keep_their_own_uses_live() {
        let mut builder = CfgBuilder::new(UnderlyingAst::Method { parameters: vec![] });
        let a = builder.parameter("a");
        let b = builder.parameter("b");
        let condition_tree = builder.tree();
        let then_tree = builder.tree();
        let else_tree = builder.tree();
        let read_a = builder.node_in_tree(NodeKind::LocalVariable(a), condition_tree);
        let zero = builder.node_in_tree(NodeKind::IntegerLiteral(0), condition_tree);
        let compare = builder.node_in_tree(
            NodeKind::BinaryOperation {
                op: BinaryOp::Gt,
                left: read_a,
                right: zero,
            },
            condition_tree,
        );
        let read_a_again = builder.node_in_tree(NodeKind::LocalVariable(a), then_tree);
        let return_a = builder.node_in_tree(
            NodeKind::Return {
                result: Some(read_a_again),
            },
            then_tree,
        );
        let read_b = builder.node_in_tree(NodeKind::LocalVariable(b), else_tree);
        let return_b = builder.node_in_tree(
            NodeKind::Return {
                result: Some(read_b),
            },
            else_tree,
        );
        let condition_block = builder.regular_block(vec![read_a, zero, compare]).unwrap();
        let conditional = builder.conditional_block();
        let then_block = builder.regular_block(vec![read_a_again, return_a]).unwrap();
        let else_block = builder.regular_block(vec![read_b, return_b]).unwrap();
        builder.edge(builder.entry(), condition_block);
        builder.edge(condition_block, conditional);
        builder.then_edge(conditional, then_block);
        builder.else_edge(conditional, else_block);
        builder.edge(then_block, builder.regular_exit());
        builder.edge(else_block, builder.regular_exit());
        let cfg = builder.finish();

        let mut result = Liveness::compute(&cfg).unwrap();
        let before_then = result.store_before_tree(&cfg, then_tree).unwrap().unwrap();
        assert_eq!(live_set(&before_then), vec![a]);
        let before_else = result.store_before_tree(&cfg, else_tree).unwrap().unwrap();
        assert_eq!(live_set(&before_else), vec![b]);
        let before_condition = result
            .store_before_tree(&cfg, condition_tree)
            .unwrap()
            .unwrap();
        assert_eq!(live_set(&before_condition), vec![a, b]);
        let entry = result.entry_store().unwrap();
        assert_eq!(live_set(entry), vec![a, b]);
    }

    /// int m(int[] xs, int i) { return xs[i]; }
    #[test]
    fn array_access_reads_surface_at_the_access_node() {
        let mut builder = CfgBuilder::new(UnderlyingAst::Method { parameters: vec![] });
        let xs = builder.parameter("xs");
        let i = builder.parameter("i");
        let return_tree = builder.tree();
        let read_xs = builder.node_in_tree(NodeKind::LocalVariable(xs), return_tree);
        let read_i = builder.node_in_tree(NodeKind::LocalVariable(i), return_tree);
        let access = builder.node_in_tree(
            NodeKind::ArrayAccess {
                array: read_xs,
                index: read_i,
            },
            return_tree,
        );
        let ret = builder.node_in_tree(NodeKind::Return { result: Some(access) }, return_tree);
        let body = builder
            .regular_block(vec![read_xs, read_i, access, ret])
            .unwrap();
        builder.edge(builder.entry(), body);
        builder.edge(body, builder.regular_exit());
        let cfg = builder.finish();

        let mut result = Liveness::compute(&cfg).unwrap();
        let before_return = result.store_before_tree(&cfg, return_tree).unwrap().unwrap();
        assert_eq!(live_set(&before_return), vec![xs, i]);
        let entry = result.entry_store().unwrap();
        assert_eq!(live_set(entry), vec![xs, i]);
    }

    /// void m() { int a = 1; int b = 2; }
    #[test]
    fn dead_assignments_leave_nothing_live() {
        let mut builder = CfgBuilder::new(UnderlyingAst::Method { parameters: vec![] });
        let a = builder.local("a");
        let b = builder.local("b");
        let one = builder.node(NodeKind::IntegerLiteral(1));
        let target_a = builder.node(NodeKind::LocalVariable(a));
        let assign_a = builder.node(NodeKind::Assignment {
            target: target_a,
            expression: one,
        });
        let two = builder.node(NodeKind::IntegerLiteral(2));
        let target_b = builder.node(NodeKind::LocalVariable(b));
        let assign_b = builder.node(NodeKind::Assignment {
            target: target_b,
            expression: two,
        });
        let body = builder
            .regular_block(vec![one, target_a, assign_a, two, target_b, assign_b])
            .unwrap();
        builder.edge(builder.entry(), body);
        builder.edge(body, builder.regular_exit());
        let cfg = builder.finish();

        let mut result = Liveness::compute(&cfg).unwrap();
        for node in [one, target_a, assign_a, two, target_b, assign_b] {
            let store = result.store_before(&cfg, node).unwrap().unwrap();
            assert!(store.is_empty(), "live variables before {node}");
            let store = result.store_after(&cfg, node).unwrap().unwrap();
            assert!(store.is_empty(), "live variables after {node}");
        }
        let after_entry = result
            .store_after_block(&cfg, cfg.entry_block())
            .unwrap()
            .unwrap();
        assert_eq!(after_entry, LiveStore::new());
        let entry = result.entry_store().unwrap();
        assert!(entry.is_empty());
    }

    #[test]
    fn query_consistency_between_before_and_after_stores() {
        let m = sum_method();
        let mut result = Liveness::compute(&m.cfg).unwrap();
        let nodes: Vec<NodeId> = m
            .cfg
            .nodes_for_tree(m.assign_tree)
            .unwrap()
            .iter()
            .copied()
            .collect();
        for node in nodes {
            // Backward: transferring the after store yields the before store.
            let after = result.store_after(&m.cfg, node).unwrap().unwrap();
            let before = result.store_before(&m.cfg, node).unwrap().unwrap();
            let mut transfer = LivenessTransfer;
            let replayed = crate::analysis::TransferFunction::transfer(
                &mut transfer,
                &m.cfg,
                node,
                crate::analysis::TransferInput::Regular(after),
            )
            .unwrap();
            assert_eq!(replayed.regular_store(), before);
        }
    }
}
