//! Backward fixpoint solver.

use crate::analysis::worklist::Worklist;
use crate::analysis::{
    self, AnalysisResult, BackwardTransferFunction, Direction, FlowRule, Store, TransferInput,
    TransferResult,
};
use crate::cfg::{BlockId, BlockKind, Cfg, NodeId, SpecialKind, Symbol};
use crate::errors::{AnalysisError, FlowResult};
use std::collections::BTreeMap;

/// Solves a backward dataflow problem: stores are threaded from the exit
/// blocks toward the entry. There is no conditional splitting in this
/// direction, so propagation is always each-to-each, and the labels of
/// exceptional edges are discarded: everything an exception block's
/// exceptional successors contribute folds into one merged exception store
/// per block.
pub struct BackwardAnalysis<T: BackwardTransferFunction> {
    transfer: T,
    /// Out stores after every basic block, absent meaning no information.
    out_stores: BTreeMap<BlockId, T::Store>,
    /// Merged contributions of each exception block's exceptional
    /// successors.
    exception_stores: BTreeMap<BlockId, T::Store>,
    inputs: BTreeMap<BlockId, TransferInput<T::Store>>,
    node_values: BTreeMap<NodeId, T::Value>,
    final_local_values: BTreeMap<Symbol, T::Value>,
    /// The store before the entry block, snapshot when it is processed.
    store_at_entry: Option<T::Store>,
    worklist: Worklist,
    is_running: bool,
}

impl<T: BackwardTransferFunction> BackwardAnalysis<T> {
    pub fn new(transfer: T) -> Self {
        Self {
            transfer,
            out_stores: BTreeMap::new(),
            exception_stores: BTreeMap::new(),
            inputs: BTreeMap::new(),
            node_values: BTreeMap::new(),
            final_local_values: BTreeMap::new(),
            store_at_entry: None,
            worklist: Worklist::new(Direction::Backward),
            is_running: false,
        }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        Direction::Backward
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Runs the solver to a fixed point.
    ///
    /// # Errors
    ///
    /// Fails on reentrant invocation, when neither exit block is reachable,
    /// or on a transfer function error. On error the partial state is
    /// discarded and the analysis can be rerun.
    pub fn perform_analysis(&mut self, cfg: &Cfg) -> FlowResult<()> {
        if self.is_running {
            return Err(AnalysisError::AlreadyRunning);
        }
        self.is_running = true;
        let outcome = self.run(cfg);
        self.is_running = false;
        outcome
    }

    /// The abstract value recorded for a node, if any.
    pub fn value_of(&self, node: NodeId) -> Option<&T::Value> {
        self.node_values.get(&node)
    }

    /// The transfer input recorded after a block, if the block was reached.
    pub fn input(&self, block: BlockId) -> Option<&TransferInput<T::Store>> {
        self.inputs.get(&block)
    }

    /// The store before the entry block, available once the solver reached
    /// it.
    pub fn entry_store(&self) -> Option<&T::Store> {
        self.store_at_entry.as_ref()
    }

    /// Consumes the analysis into its queryable result.
    pub fn into_result(self) -> AnalysisResult<T> {
        AnalysisResult::new(
            Direction::Backward,
            self.transfer,
            self.node_values,
            self.inputs,
            self.exception_stores,
            self.final_local_values,
            BTreeMap::new(),
            self.store_at_entry,
        )
    }

    fn run(&mut self, cfg: &Cfg) -> FlowResult<()> {
        self.init(cfg)?;
        while let Some(block) = self.worklist.pop() {
            self.perform_block(cfg, block)?;
        }
        Ok(())
    }

    fn init(&mut self, cfg: &Cfg) -> FlowResult<()> {
        self.out_stores.clear();
        self.exception_stores.clear();
        self.inputs.clear();
        self.node_values.clear();
        self.final_local_values.clear();
        self.store_at_entry = None;
        self.worklist.process(cfg);

        let regular_exit = cfg.regular_exit_block();
        let exceptional_exit = cfg.exceptional_exit_block();
        if !self.worklist.is_reachable(regular_exit)
            && !self.worklist.is_reachable(exceptional_exit)
        {
            return Err(AnalysisError::NoExitBlock);
        }

        if self.worklist.is_reachable(regular_exit) {
            let initial = self
                .transfer
                .initial_normal_exit_store(cfg, cfg.return_nodes());
            self.inputs
                .insert(regular_exit, TransferInput::Regular(initial.clone()));
            self.out_stores.insert(regular_exit, initial);
            self.worklist.add(regular_exit);
        }
        if self.worklist.is_reachable(exceptional_exit) {
            let initial = self.transfer.initial_exceptional_exit_store(cfg);
            self.inputs
                .insert(exceptional_exit, TransferInput::Regular(initial.clone()));
            self.out_stores.insert(exceptional_exit, initial);
            self.worklist.add(exceptional_exit);
        }
        Ok(())
    }

    fn perform_block(&mut self, cfg: &Cfg, block: BlockId) -> FlowResult<()> {
        log::debug!("---- block {block}");
        match cfg.block(block).kind() {
            BlockKind::Regular { contents, .. } => {
                let input = self
                    .inputs
                    .get(&block)
                    .expect("dequeued regular block without input")
                    .clone();
                let mut current = input;
                let mut requeue = false;
                let mut first = None;
                for &node in contents.iter().rev() {
                    let result = self.call_transfer(cfg, node, current)?;
                    requeue |= analysis::update_node_values(
                        &mut self.node_values,
                        node,
                        result.value(),
                        result.store_changed(),
                    );
                    current = result.into_input();
                    first = Some(node);
                }
                for predecessor in cfg.predecessors(block) {
                    self.propagate_stores_to(
                        cfg,
                        predecessor,
                        first,
                        &current,
                        FlowRule::EachToEach,
                        requeue,
                    )?;
                }
            }

            BlockKind::Exception { node, .. } => {
                let input = self
                    .inputs
                    .get(&block)
                    .expect("dequeued exception block without input")
                    .clone();
                let node = *node;
                let result = self.call_transfer(cfg, node, input)?;
                let requeue = analysis::update_node_values(
                    &mut self.node_values,
                    node,
                    result.value(),
                    result.store_changed(),
                );
                // The node may complete abruptly, so what precedes it must
                // also account for the handlers' demands.
                let mut merged = result.regular_store();
                if let Some(exception_store) = self.exception_stores.get(&block) {
                    merged = merged.least_upper_bound(exception_store);
                }
                for predecessor in cfg.predecessors(block) {
                    self.add_store_after(cfg, predecessor, Some(node), merged.clone(), requeue);
                }
            }

            BlockKind::Conditional { .. } => {
                let input = self
                    .inputs
                    .get(&block)
                    .expect("dequeued conditional block without input")
                    .clone();
                for predecessor in cfg.predecessors(block) {
                    self.propagate_stores_to(
                        cfg,
                        predecessor,
                        None,
                        &input,
                        FlowRule::EachToEach,
                        false,
                    )?;
                }
            }

            BlockKind::Special { kind, .. } => match kind {
                SpecialKind::Entry => {
                    self.store_at_entry = self.out_stores.get(&block).cloned();
                }
                SpecialKind::Exit | SpecialKind::ExceptionalExit => {
                    let input = self
                        .inputs
                        .get(&block)
                        .expect("dequeued exit block without input")
                        .clone();
                    for predecessor in cfg.predecessors(block) {
                        self.propagate_stores_to(
                            cfg,
                            predecessor,
                            None,
                            &input,
                            FlowRule::EachToEach,
                            false,
                        )?;
                    }
                }
            },
        }
        Ok(())
    }

    fn call_transfer(
        &mut self,
        cfg: &Cfg,
        node: NodeId,
        input: TransferInput<T::Store>,
    ) -> FlowResult<TransferResult<T::Value, T::Store>> {
        log::trace!("transfer({node})");
        let result = self
            .transfer
            .transfer(cfg, node, input)
            .map_err(T::Error::into)?;
        log::trace!("    before: {}", result.regular_store());
        analysis::record_final_local(cfg, &mut self.final_local_values, node, result.value());
        Ok(result)
    }

    fn propagate_stores_to(
        &mut self,
        cfg: &Cfg,
        predecessor: BlockId,
        node: Option<NodeId>,
        input: &TransferInput<T::Store>,
        flow_rule: FlowRule,
        requeue: bool,
    ) -> FlowResult<()> {
        if flow_rule != FlowRule::EachToEach {
            return Err(AnalysisError::BackwardFlowRule(flow_rule));
        }
        self.add_store_after(cfg, predecessor, node, input.regular_store(), requeue);
        Ok(())
    }

    /// Merges an incoming store into the out store of `predecessor`, or into
    /// its merged exception store when the store arrives over an exceptional
    /// edge, and requeues the block when anything changed.
    fn add_store_after(
        &mut self,
        cfg: &Cfg,
        predecessor: BlockId,
        node: Option<NodeId>,
        store: T::Store,
        mut add_to_worklist: bool,
    ) {
        let mut exceptional = false;
        if matches!(cfg.block(predecessor).kind(), BlockKind::Exception { .. }) {
            if let Some(origin) = node.and_then(|n| cfg.node(n).block()) {
                // A store coming back over the normal successor updates the
                // out store even if the same block also catches.
                exceptional = cfg.successor(predecessor) != Some(origin)
                    && cfg.is_exceptional_successor(predecessor, origin);
            }
        }

        if exceptional {
            let previous = self.exception_stores.get(&predecessor).cloned();
            let merged = match &previous {
                Some(previous) => previous.least_upper_bound(&store),
                None => store,
            };
            if previous.as_ref() != Some(&merged) {
                self.exception_stores.insert(predecessor, merged);
                add_to_worklist = true;
            }
        } else {
            let previous = self.out_stores.get(&predecessor).cloned();
            let merged = match &previous {
                Some(previous) => previous.least_upper_bound(&store),
                None => store,
            };
            if previous.as_ref() != Some(&merged) {
                self.out_stores.insert(predecessor, merged.clone());
                self.inputs
                    .insert(predecessor, TransferInput::Regular(merged));
                add_to_worklist = true;
            }
        }

        if add_to_worklist {
            self.worklist.add(predecessor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{CfgBuilder, ExceptionTag, NodeKind, UnderlyingAst};
    use crate::liveness::{LiveStore, LiveValue, LivenessTransfer};

    #[test]
    fn a_graph_without_reachable_exits_is_rejected() {
        let mut builder = CfgBuilder::new(UnderlyingAst::ArbitraryCode);
        let node = builder.node(NodeKind::IntegerLiteral(0));
        let body = builder.regular_block(vec![node]).unwrap();
        builder.edge(builder.entry(), body);
        builder.edge(body, body);
        let cfg = builder.finish();

        let mut analysis = BackwardAnalysis::new(LivenessTransfer);
        assert!(matches!(
            analysis.perform_analysis(&cfg),
            Err(AnalysisError::NoExitBlock)
        ));
        assert!(!analysis.is_running());
    }

    #[test]
    fn propagation_rejects_conditional_flow_rules() {
        let mut builder = CfgBuilder::new(UnderlyingAst::ArbitraryCode);
        let node = builder.node(NodeKind::IntegerLiteral(0));
        let body = builder.regular_block(vec![node]).unwrap();
        builder.edge(builder.entry(), body);
        builder.edge(body, builder.regular_exit());
        let cfg = builder.finish();

        let mut analysis = BackwardAnalysis::new(LivenessTransfer);
        analysis.worklist.process(&cfg);
        let input = TransferInput::Regular(LiveStore::new());
        assert!(matches!(
            analysis.propagate_stores_to(
                &cfg,
                body,
                None,
                &input,
                FlowRule::ThenToBoth,
                false
            ),
            Err(AnalysisError::BackwardFlowRule(FlowRule::ThenToBoth))
        ));
    }

    /// try { m(z); return x; } catch (_) { return y; }
    ///
    /// The handler's demand on `y` must flow through the exception block's
    /// merged exception store, alongside the normal demand on `x` and the
    /// call argument `z`.
    #[test]
    fn handler_demands_fold_into_the_exception_store() {
        let mut builder = CfgBuilder::new(UnderlyingAst::Method { parameters: vec![] });
        let x = builder.parameter("x");
        let y = builder.parameter("y");
        let z = builder.parameter("z");
        let read_z = builder.node(NodeKind::LocalVariable(z));
        let call = builder.node(NodeKind::MethodInvocation {
            arguments: vec![read_z],
        });
        let eb = builder.exception_block(call);
        let read_x = builder.node(NodeKind::LocalVariable(x));
        let return_x = builder.node(NodeKind::Return {
            result: Some(read_x),
        });
        let normal = builder.regular_block(vec![read_x, return_x]).unwrap();
        let read_y = builder.node(NodeKind::LocalVariable(y));
        let return_y = builder.node(NodeKind::Return {
            result: Some(read_y),
        });
        let handler = builder.regular_block(vec![read_y, return_y]).unwrap();
        builder.edge(builder.entry(), eb);
        builder.edge(eb, normal);
        builder.exception_edge(eb, handler, ExceptionTag::new("any"));
        builder.edge(normal, builder.regular_exit());
        builder.edge(handler, builder.regular_exit());
        let cfg = builder.finish();

        let mut analysis = BackwardAnalysis::new(LivenessTransfer);
        analysis.perform_analysis(&cfg).unwrap();

        // After the call only the normal continuation's demand remains.
        let mut normal_demand = LiveStore::new();
        normal_demand.put(LiveValue::new(&cfg, read_x).unwrap());
        assert_eq!(
            analysis.input(eb),
            Some(&TransferInput::Regular(normal_demand))
        );

        // Before the call everything is needed.
        let mut expected = LiveStore::new();
        for read in [read_x, read_y, read_z] {
            expected.put(LiveValue::new(&cfg, read).unwrap());
        }
        assert_eq!(analysis.entry_store(), Some(&expected));

        // The replayed before-store of the call merges the exception store.
        let mut result = analysis.into_result();
        let before_call = result.store_before(&cfg, call).unwrap().unwrap();
        assert_eq!(before_call, expected);
        // The after-store of the call is the normal out store alone.
        let mut after_expected = LiveStore::new();
        after_expected.put(LiveValue::new(&cfg, read_x).unwrap());
        let after_call = result.store_after(&cfg, call).unwrap().unwrap();
        assert_eq!(after_call, after_expected);
    }
}
