//! Live variable store.

use crate::analysis::Store;
use crate::cfg::{Cfg, NodeId, NodeKind};
use crate::liveness::LiveValue;
use std::collections::BTreeSet;
use std::fmt;

/// The set of variables live at a program point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LiveStore {
    live: BTreeSet<LiveValue>,
}

impl LiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    #[inline]
    pub fn contains(&self, value: &LiveValue) -> bool {
        self.live.contains(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveValue> {
        self.live.iter()
    }

    /// Marks a variable live.
    pub fn put(&mut self, value: LiveValue) {
        self.live.insert(value);
    }

    /// Removes a variable, typically because it was just (re)defined.
    pub fn kill(&mut self, value: &LiveValue) {
        self.live.remove(value);
    }

    /// Adds every variable use structurally reachable in `expression`:
    /// recurses through operator nodes down to the local-variable and
    /// field-access reads.
    pub fn add_uses_in_expression(&mut self, cfg: &Cfg, expression: NodeId) {
        match cfg.node(expression).kind() {
            NodeKind::BinaryOperation { left, right, .. } => {
                self.add_uses_in_expression(cfg, *left);
                self.add_uses_in_expression(cfg, *right);
            }
            NodeKind::UnaryOperation { operand, .. }
            | NodeKind::TypeCast { operand }
            | NodeKind::InstanceOf { operand } => {
                self.add_uses_in_expression(cfg, *operand);
            }
            NodeKind::TernaryExpression {
                condition,
                then_operand,
                else_operand,
            } => {
                self.add_uses_in_expression(cfg, *condition);
                self.add_uses_in_expression(cfg, *then_operand);
                self.add_uses_in_expression(cfg, *else_operand);
            }
            NodeKind::LocalVariable(_) | NodeKind::FieldAccess { .. } => {
                if let Some(value) = LiveValue::new(cfg, expression) {
                    self.put(value);
                }
            }
            _ => (),
        }
    }
}

impl Store for LiveStore {
    fn least_upper_bound(&self, other: &Self) -> Self {
        Self {
            live: self.live.union(&other.live).cloned().collect(),
        }
    }

    // The lattice has finite height, so the default `widened_upper_bound`
    // (unsupported) and `can_alias` (conservative) apply.
}

impl fmt::Display for LiveStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.live.is_empty() {
            return write!(f, "no live variables");
        }
        for (i, value) in self.live.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}
