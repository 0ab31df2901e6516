// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use canopy_types::TreeError;
use thiserror::Error;

/// Errors surfaced by the consensus glue above the Tree State layer.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// A committed log index regressed below `applied_index`. Once raised, the node must refuse
    /// further writes until restarted from a fresh snapshot.
    #[error("log index {index} is behind applied_index {applied_index}; node is inconsistent")]
    Inconsistent { index: u64, applied_index: u64 },

    /// Execution of a committed batch failed on every retry within the bounded-retry cap.
    #[error("failed to apply log index {index} after {attempts} attempts: {source}")]
    ApplyFailed {
        index: u64,
        attempts: u32,
        #[source]
        source: TreeError,
    },

    /// `flush()` failed on every retry within the bounded-retry cap.
    #[error("failed to flush state for log index {index} after {attempts} attempts: {source}")]
    FlushFailed {
        index: u64,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The Pre-Committer's consensus append future did not resolve within its configured timeout.
    #[error("consensus append timed out waiting for batch to commit")]
    AppendTimeout,

    /// No leader is currently visible to the Operator Router.
    #[error("no cluster leader is currently visible")]
    LeaderUnknown,

    /// The node permanently refuses new operations after its log FSM detected an
    /// unrecoverable divergence between the tree and the committed log.
    #[error("node is inconsistent and refuses new operations until restart")]
    NodeFrozen,

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
