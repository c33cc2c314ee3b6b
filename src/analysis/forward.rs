//! Forward fixpoint solver.

use crate::analysis::transfer::StoreKind;
use crate::analysis::worklist::Worklist;
use crate::analysis::{
    self, AnalysisResult, Direction, FlowRule, ForwardTransferFunction, Store, TransferInput,
    TransferResult,
};
use crate::cfg::{BlockId, BlockKind, Cfg, NodeId, Symbol};
use crate::errors::{AnalysisError, FlowResult};
use std::collections::BTreeMap;

/// Solves a forward dataflow problem: stores are threaded from the entry
/// block toward the exits, conditional blocks split them into then/else
/// pairs, and exception blocks fan them out to their handlers.
pub struct ForwardAnalysis<T: ForwardTransferFunction> {
    transfer: T,
    /// Widening threshold; `None` assumes a lattice of finite height.
    max_count_before_widening: Option<u32>,
    /// Visits of each block since widening was last applied to it.
    block_count: BTreeMap<BlockId, u32>,
    /// Then stores before every block, absent meaning no information.
    then_stores: BTreeMap<BlockId, T::Store>,
    /// Else stores before every block, absent meaning no information.
    else_stores: BTreeMap<BlockId, T::Store>,
    inputs: BTreeMap<BlockId, TransferInput<T::Store>>,
    node_values: BTreeMap<NodeId, T::Value>,
    final_local_values: BTreeMap<Symbol, T::Value>,
    stores_at_return_statements: BTreeMap<NodeId, TransferResult<T::Value, T::Store>>,
    worklist: Worklist,
    is_running: bool,
}

impl<T: ForwardTransferFunction> ForwardAnalysis<T> {
    /// An analysis that never widens; the lattice must have finite height.
    pub fn new(transfer: T) -> Self {
        Self::build(transfer, None)
    }

    /// An analysis that widens a block's merge once the block has been
    /// revisited `max_count_before_widening` times.
    pub fn with_widening(transfer: T, max_count_before_widening: u32) -> Self {
        Self::build(transfer, Some(max_count_before_widening))
    }

    fn build(transfer: T, max_count_before_widening: Option<u32>) -> Self {
        Self {
            transfer,
            max_count_before_widening,
            block_count: BTreeMap::new(),
            then_stores: BTreeMap::new(),
            else_stores: BTreeMap::new(),
            inputs: BTreeMap::new(),
            node_values: BTreeMap::new(),
            final_local_values: BTreeMap::new(),
            stores_at_return_statements: BTreeMap::new(),
            worklist: Worklist::new(Direction::Forward),
            is_running: false,
        }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        Direction::Forward
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.is_running
    }

    /// Runs the solver to a fixed point.
    ///
    /// # Errors
    ///
    /// Fails on reentrant invocation, on a transfer function error, or when
    /// widening engages on a store lattice that does not support it. On
    /// error the partial state is discarded and the analysis can be rerun.
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

    /// The transfer input recorded before a block, if the block was reached.
    pub fn input(&self, block: BlockId) -> Option<&TransferInput<T::Store>> {
        self.inputs.get(&block)
    }

    /// The store at the regular exit, `None` when the unit cannot exit
    /// normally.
    pub fn regular_exit_store(&self, cfg: &Cfg) -> Option<T::Store> {
        self.inputs
            .get(&cfg.regular_exit_block())
            .map(TransferInput::regular_store)
    }

    /// The store at the exceptional exit, `None` when no exception escapes.
    pub fn exceptional_exit_store(&self, cfg: &Cfg) -> Option<T::Store> {
        self.inputs
            .get(&cfg.exceptional_exit_block())
            .map(TransferInput::regular_store)
    }

    /// The transfer results recorded at return statements, ordered like
    /// `cfg.return_nodes()`. Unreachable returns have no entry.
    pub fn return_statement_stores(
        &self,
        cfg: &Cfg,
    ) -> Vec<(NodeId, Option<&TransferResult<T::Value, T::Store>>)> {
        cfg.return_nodes()
            .iter()
            .map(|node| (*node, self.stores_at_return_statements.get(node)))
            .collect()
    }

    /// Consumes the analysis into its queryable result.
    pub fn into_result(self) -> AnalysisResult<T> {
        AnalysisResult::new(
            Direction::Forward,
            self.transfer,
            self.node_values,
            self.inputs,
            BTreeMap::new(),
            self.final_local_values,
            self.stores_at_return_statements,
            None,
        )
    }

    fn run(&mut self, cfg: &Cfg) -> FlowResult<()> {
        self.init(cfg);
        while let Some(block) = self.worklist.pop() {
            self.perform_block(cfg, block)?;
        }
        Ok(())
    }

    fn init(&mut self, cfg: &Cfg) {
        self.block_count.clear();
        self.then_stores.clear();
        self.else_stores.clear();
        self.inputs.clear();
        self.node_values.clear();
        self.final_local_values.clear();
        self.stores_at_return_statements.clear();
        self.worklist.process(cfg);

        let ast = cfg.underlying_ast();
        let initial = self
            .transfer
            .initial_store(cfg, ast, ast.parameters());
        let entry = cfg.entry_block();
        self.then_stores.insert(entry, initial.clone());
        self.else_stores.insert(entry, initial.clone());
        self.inputs.insert(entry, TransferInput::Regular(initial));
        self.worklist.add(entry);
    }

    fn perform_block(&mut self, cfg: &Cfg, block: BlockId) -> FlowResult<()> {
        log::debug!("---- block {block}");
        match cfg.block(block).kind() {
            BlockKind::Regular {
                contents,
                flow_rule,
            } => {
                let input = self
                    .inputs
                    .get(&block)
                    .expect("dequeued regular block without input")
                    .clone();
                let mut current = input;
                let mut requeue = false;
                for &node in contents {
                    let result = self.call_transfer(cfg, node, current)?;
                    requeue |= analysis::update_node_values(
                        &mut self.node_values,
                        node,
                        result.value(),
                        result.store_changed(),
                    );
                    current = result.into_input();
                }
                let successor = cfg
                    .successor(block)
                    .expect("regular block without successor");
                self.propagate_stores_to(successor, &current, *flow_rule, requeue)?;
            }

            BlockKind::Exception { node, flow_rule } => {
                let input_before = self
                    .inputs
                    .get(&block)
                    .expect("dequeued exception block without input")
                    .clone();
                let node = *node;
                let flow_rule = *flow_rule;
                let result = self.call_transfer(cfg, node, input_before.clone())?;
                let requeue = analysis::update_node_values(
                    &mut self.node_values,
                    node,
                    result.value(),
                    result.store_changed(),
                );

                if let Some(successor) = cfg.successor(block) {
                    let next = result.clone().into_input();
                    self.propagate_stores_to(successor, &next, flow_rule, requeue)?;
                }

                for (tag, successors) in cfg.exceptional_successors(block) {
                    // An exception may be thrown before the node had any
                    // effect, hence the fallback to the pre-transfer store.
                    let store = match result.exceptional_store(&tag) {
                        Some(store) => store.clone(),
                        None => input_before.regular_store(),
                    };
                    for successor in successors {
                        self.add_store_before(successor, store.clone(), StoreKind::Both, requeue)?;
                    }
                }
            }

            BlockKind::Conditional {
                then_flow_rule,
                else_flow_rule,
            } => {
                let input = self
                    .inputs
                    .get(&block)
                    .expect("dequeued conditional block without input")
                    .clone();
                let then_successor = cfg
                    .then_successor(block)
                    .expect("conditional block without then successor");
                let else_successor = cfg
                    .else_successor(block)
                    .expect("conditional block without else successor");
                self.propagate_stores_to(then_successor, &input, *then_flow_rule, false)?;
                self.propagate_stores_to(else_successor, &input, *else_flow_rule, false)?;
            }

            // Special blocks hold no nodes and cannot throw, so there is
            // nothing to transfer; the seeded entry input still flows on.
            BlockKind::Special { flow_rule, .. } => {
                if let Some(successor) = cfg.successor(block) {
                    let input = self
                        .inputs
                        .get(&block)
                        .expect("dequeued special block without input")
                        .clone();
                    self.propagate_stores_to(successor, &input, *flow_rule, false)?;
                }
            }
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
        log::trace!("    after: {}", result.regular_store());
        analysis::record_final_local(cfg, &mut self.final_local_values, node, result.value());
        if cfg.is_return_node(node) {
            self.stores_at_return_statements.insert(node, result.clone());
        }
        Ok(result)
    }

    /// Routes the stores leaving a block into a successor's input according
    /// to the flow rule.
    fn propagate_stores_to(
        &mut self,
        successor: BlockId,
        input: &TransferInput<T::Store>,
        flow_rule: FlowRule,
        requeue: bool,
    ) -> FlowResult<()> {
        match flow_rule {
            FlowRule::EachToEach => {
                if input.contains_two_stores() {
                    self.add_store_before(
                        successor,
                        input.then_store().clone(),
                        StoreKind::Then,
                        requeue,
                    )?;
                    self.add_store_before(
                        successor,
                        input.else_store().clone(),
                        StoreKind::Else,
                        requeue,
                    )?;
                } else {
                    self.add_store_before(
                        successor,
                        input.regular_store(),
                        StoreKind::Both,
                        requeue,
                    )?;
                }
            }
            FlowRule::ThenToBoth => self.add_store_before(
                successor,
                input.then_store().clone(),
                StoreKind::Both,
                requeue,
            )?,
            FlowRule::ElseToBoth => self.add_store_before(
                successor,
                input.else_store().clone(),
                StoreKind::Both,
                requeue,
            )?,
            FlowRule::ThenToThen => self.add_store_before(
                successor,
                input.then_store().clone(),
                StoreKind::Then,
                requeue,
            )?,
            FlowRule::ElseToElse => self.add_store_before(
                successor,
                input.else_store().clone(),
                StoreKind::Else,
                requeue,
            )?,
        }
        Ok(())
    }

    /// Merges an incoming store into the stores recorded before `block` and
    /// requeues the block when anything changed.
    fn add_store_before(
        &mut self,
        block: BlockId,
        store: T::Store,
        kind: StoreKind,
        mut add_to_worklist: bool,
    ) -> FlowResult<()> {
        let then_store = self.then_stores.get(&block).cloned();
        let else_store = self.else_stores.get(&block).cloned();
        let should_widen = self.consult_widening_counter(block);

        match kind {
            StoreKind::Then => {
                let new_then = merge_stores(store, then_store.as_ref(), should_widen)?;
                if then_store.as_ref() != Some(&new_then) {
                    self.then_stores.insert(block, new_then.clone());
                    if let Some(else_store) = else_store {
                        self.inputs.insert(
                            block,
                            TransferInput::ThenElse {
                                then: new_then,
                                else_: else_store,
                            },
                        );
                        add_to_worklist = true;
                    }
                }
            }
            StoreKind::Else => {
                let new_else = merge_stores(store, else_store.as_ref(), should_widen)?;
                if else_store.as_ref() != Some(&new_else) {
                    self.else_stores.insert(block, new_else.clone());
                    if let Some(then_store) = then_store {
                        self.inputs.insert(
                            block,
                            TransferInput::ThenElse {
                                then: then_store,
                                else_: new_else,
                            },
                        );
                        add_to_worklist = true;
                    }
                }
            }
            StoreKind::Both => {
                if then_store == else_store {
                    // Both sides share one store, the common case.
                    let new_store = merge_stores(store, then_store.as_ref(), should_widen)?;
                    if then_store.as_ref() != Some(&new_store) {
                        self.then_stores.insert(block, new_store.clone());
                        self.else_stores.insert(block, new_store.clone());
                        self.inputs
                            .insert(block, TransferInput::Regular(new_store));
                        add_to_worklist = true;
                    }
                } else {
                    let mut store_changed = false;
                    let new_then =
                        merge_stores(store.clone(), then_store.as_ref(), should_widen)?;
                    if then_store.as_ref() != Some(&new_then) {
                        self.then_stores.insert(block, new_then.clone());
                        store_changed = true;
                    }
                    let new_else = merge_stores(store, else_store.as_ref(), should_widen)?;
                    if else_store.as_ref() != Some(&new_else) {
                        self.else_stores.insert(block, new_else.clone());
                        store_changed = true;
                    }
                    if store_changed {
                        self.inputs.insert(
                            block,
                            TransferInput::ThenElse {
                                then: new_then,
                                else_: new_else,
                            },
                        );
                        add_to_worklist = true;
                    }
                }
            }
        }

        if add_to_worklist {
            self.worklist.add(block);
        }
        Ok(())
    }

    /// Whether the next merge at `block` must widen, updating the per-block
    /// visit counter.
    fn consult_widening_counter(&mut self, block: BlockId) -> bool {
        let max = match self.max_count_before_widening {
            Some(max) => max,
            None => return false,
        };
        let count = self.block_count.get(&block).copied().unwrap_or(0);
        let widen = count >= max;
        self.block_count.insert(block, if widen { 0 } else { count + 1 });
        widen
    }
}

fn merge_stores<S: Store>(
    new: S,
    previous: Option<&S>,
    should_widen: bool,
) -> FlowResult<S> {
    match previous {
        None => Ok(new),
        Some(previous) if should_widen => new
            .widened_upper_bound(previous)
            .ok_or(AnalysisError::WideningUnsupported),
        Some(previous) => Ok(new.least_upper_bound(previous)),
    }
}
