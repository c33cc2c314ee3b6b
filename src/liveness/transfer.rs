//! Live variable transfer function.

use crate::analysis::{
    BackwardTransferFunction, TransferFunction, TransferInput, TransferResult,
};
use crate::cfg::{Cfg, NodeId, NodeKind};
use crate::errors::AnalysisError;
use crate::liveness::{LiveStore, LiveValue};

/// Backward transfer function computing live variables: assignments kill
/// their target and gen the uses in their right-hand side, every other node
/// gens the uses in its operands.
#[derive(Debug, Default)]
pub struct LivenessTransfer;

impl TransferFunction for LivenessTransfer {
    type Value = LiveValue;
    type Store = LiveStore;
    type Error = AnalysisError;

    fn transfer(
        &mut self,
        cfg: &Cfg,
        node: NodeId,
        input: TransferInput<LiveStore>,
    ) -> Result<TransferResult<LiveValue, LiveStore>, AnalysisError> {
        let mut store = input.regular_store();
        match cfg.node(node).kind() {
            NodeKind::Assignment { target, expression } => {
                if let Some(killed) = LiveValue::new(cfg, *target) {
                    store.kill(&killed);
                }
                store.add_uses_in_expression(cfg, *expression);
            }
            NodeKind::Return { result } => {
                if let Some(result) = result {
                    store.add_uses_in_expression(cfg, *result);
                }
            }
            kind => {
                // Reads nested under kinds the expression walk does not
                // descend into (array indices, call arguments) surface here
                // when their parent node is visited.
                for operand in kind.operands() {
                    store.add_uses_in_expression(cfg, operand);
                }
            }
        }
        Ok(TransferResult::regular(None, store))
    }
}

impl BackwardTransferFunction for LivenessTransfer {
    fn initial_normal_exit_store(&mut self, _cfg: &Cfg, _return_nodes: &[NodeId]) -> LiveStore {
        LiveStore::new()
    }

    fn initial_exceptional_exit_store(&mut self, _cfg: &Cfg) -> LiveStore {
        LiveStore::new()
    }
}
