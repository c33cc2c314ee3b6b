//! Analysis errors definition.

use crate::analysis::FlowRule;
use crate::cfg::{BlockId, NodeId};
use thiserror::Error;

pub type FlowResult<T> = Result<T, AnalysisError>;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("perform_analysis called while the analysis is already running")]
    AlreadyRunning,

    #[error("backward analysis always propagates each-to-each, got {0:?}")]
    BackwardFlowRule(FlowRule),

    #[error("neither the regular exit nor the exceptional exit is reachable")]
    NoExitBlock,

    #[error("node {0} is not part of the contents of block {1}")]
    NodeNotInBlock(NodeId, BlockId),

    #[error("node {0} does not belong to any block")]
    NodeOutsideCfg(NodeId),

    #[error("block {0} cannot appear at this dispatch site")]
    UnexpectedBlock(BlockId),

    #[error("store widening requested but the lattice does not support it")]
    WideningUnsupported,

    #[error("a regular block must contain at least one node")]
    EmptyRegularBlock,

    #[error("transfer function error: {0}")]
    Transfer(String),
}
