//! Store plumbing between the solver and transfer functions.

use crate::analysis::lattice::{AbstractValue, Store};
use crate::cfg::{Cfg, ExceptionTag, NodeId, Symbol, UnderlyingAst};
use crate::errors::AnalysisError;
use std::collections::BTreeMap;

/// Policy for deriving a successor's stores from the stores leaving a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowRule {
    /// then goes to then, else goes to else; a regular store goes to both.
    #[default]
    EachToEach,
    /// The then store becomes both stores of the successor.
    ThenToBoth,
    /// The else store becomes both stores of the successor.
    ElseToBoth,
    /// The then store goes to the successor's then store only.
    ThenToThen,
    /// The else store goes to the successor's else store only.
    ElseToElse,
}

/// Which side of a successor's input an incoming store lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreKind {
    Then,
    Else,
    Both,
}

/// The store(s) flowing into a transfer function call: either a single
/// regular store or a then/else pair downstream of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferInput<S> {
    Regular(S),
    ThenElse { then: S, else_: S },
}

impl<S: Store> TransferInput<S> {
    /// The undiscriminated store: the lub of both branches on a split input.
    pub fn regular_store(&self) -> S {
        match self {
            Self::Regular(store) => store.clone(),
            Self::ThenElse { then, else_ } => then.least_upper_bound(else_),
        }
    }

    /// The then-branch store; on a regular input, the single store.
    pub fn then_store(&self) -> &S {
        match self {
            Self::Regular(store) => store,
            Self::ThenElse { then, .. } => then,
        }
    }

    /// The else-branch store; on a regular input, the single store.
    pub fn else_store(&self) -> &S {
        match self {
            Self::Regular(store) => store,
            Self::ThenElse { else_, .. } => else_,
        }
    }

    #[inline]
    pub fn contains_two_stores(&self) -> bool {
        matches!(self, Self::ThenElse { .. })
    }
}

/// What a transfer function produced for one node: an optional abstract
/// value for the node, the outgoing store(s), and stores for the
/// exceptional successors the node may reach.
#[derive(Debug, Clone)]
pub struct TransferResult<V, S> {
    value: Option<V>,
    store: TransferInput<S>,
    exceptional_stores: BTreeMap<ExceptionTag, S>,
    store_changed: bool,
}

impl<V: AbstractValue, S: Store> TransferResult<V, S> {
    pub fn regular(value: Option<V>, store: S) -> Self {
        Self {
            value,
            store: TransferInput::Regular(store),
            exceptional_stores: BTreeMap::new(),
            store_changed: false,
        }
    }

    pub fn conditional(value: Option<V>, then: S, else_: S) -> Self {
        Self {
            value,
            store: TransferInput::ThenElse { then, else_ },
            exceptional_stores: BTreeMap::new(),
            store_changed: false,
        }
    }

    /// Marks that the incoming store was mutated in place rather than
    /// replaced, forcing re-examination of the successors.
    pub fn with_store_changed(mut self) -> Self {
        self.store_changed = true;
        self
    }

    pub fn with_exceptional_store(mut self, tag: ExceptionTag, store: S) -> Self {
        self.exceptional_stores.insert(tag, store);
        self
    }

    #[inline]
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    #[inline]
    pub fn store_changed(&self) -> bool {
        self.store_changed
    }

    pub fn regular_store(&self) -> S {
        self.store.regular_store()
    }

    pub fn then_store(&self) -> &S {
        self.store.then_store()
    }

    pub fn else_store(&self) -> &S {
        self.store.else_store()
    }

    pub fn exceptional_store(&self, tag: &ExceptionTag) -> Option<&S> {
        self.exceptional_stores.get(tag)
    }

    pub fn exceptional_stores(&self) -> &BTreeMap<ExceptionTag, S> {
        &self.exceptional_stores
    }

    /// The input of the next transfer call, keeping a then/else split.
    pub fn into_input(self) -> TransferInput<S> {
        self.store
    }
}

/// The visitor the solver dispatches on every node.
///
/// The input is moved into the call: the function may mutate the store in
/// place and hand it back, or replace it. The solver clones beforehand
/// whenever it must preserve the previous store.
pub trait TransferFunction {
    type Value: AbstractValue;
    type Store: Store;
    type Error: Into<AnalysisError>;

    fn transfer(
        &mut self,
        cfg: &Cfg,
        node: NodeId,
        input: TransferInput<Self::Store>,
    ) -> Result<TransferResult<Self::Value, Self::Store>, Self::Error>;
}

/// Transfer function of a forward analysis.
pub trait ForwardTransferFunction: TransferFunction {
    /// The store seeded at the entry block.
    fn initial_store(
        &mut self,
        cfg: &Cfg,
        ast: &UnderlyingAst,
        parameters: &[Symbol],
    ) -> Self::Store;
}

/// Transfer function of a backward analysis.
pub trait BackwardTransferFunction: TransferFunction {
    /// The store seeded at the regular exit block.
    fn initial_normal_exit_store(&mut self, cfg: &Cfg, return_nodes: &[NodeId]) -> Self::Store;

    /// The store seeded at the exceptional exit block.
    fn initial_exceptional_exit_store(&mut self, cfg: &Cfg) -> Self::Store;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::{LiveStore, LiveValue};
    use crate::cfg::{CfgBuilder, NodeKind, UnderlyingAst};

    fn stores() -> (LiveStore, LiveStore) {
        let mut builder = CfgBuilder::new(UnderlyingAst::ArbitraryCode);
        let x = builder.local("x");
        let y = builder.local("y");
        let read_x = builder.node(NodeKind::LocalVariable(x));
        let read_y = builder.node(NodeKind::LocalVariable(y));
        let cfg = builder.finish();
        let mut with_x = LiveStore::new();
        with_x.put(LiveValue::new(&cfg, read_x).unwrap());
        let mut with_y = LiveStore::new();
        with_y.put(LiveValue::new(&cfg, read_y).unwrap());
        (with_x, with_y)
    }

    #[test]
    fn regular_store_of_split_input_is_the_lub() {
        let (with_x, with_y) = stores();
        let input = TransferInput::ThenElse {
            then: with_x.clone(),
            else_: with_y.clone(),
        };
        let merged = input.regular_store();
        assert_eq!(merged, with_x.least_upper_bound(&with_y));
        assert!(input.contains_two_stores());
    }

    #[test]
    fn branch_stores_of_regular_input_are_the_single_store() {
        let (with_x, _) = stores();
        let input = TransferInput::Regular(with_x.clone());
        assert_eq!(input.then_store(), &with_x);
        assert_eq!(input.else_store(), &with_x);
        assert_eq!(input.regular_store(), with_x);
        assert!(!input.contains_two_stores());
    }

    #[test]
    fn conditional_result_keeps_the_split_through_into_input() {
        let (with_x, with_y) = stores();
        let result: TransferResult<LiveValue, LiveStore> =
            TransferResult::conditional(None, with_x.clone(), with_y.clone());
        match result.into_input() {
            TransferInput::ThenElse { then, else_ } => {
                assert_eq!(then, with_x);
                assert_eq!(else_, with_y);
            }
            TransferInput::Regular(_) => panic!("split result collapsed to a regular input"),
        }
    }
}
