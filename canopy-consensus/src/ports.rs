// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trait contracts for the collaborators this crate keeps out of scope: the consensus log
//! transport and the peer-to-peer RPC used to reach the current leader.

use async_trait::async_trait;
use canopy_types::{InstructionBatch, Instruction, PeerId};

/// A single committed log entry, decoded enough for the Log FSM to act on. The real adapter over
/// a committed-entry callback from the consensus transport implements this directly;
/// `canopy-consensus` never depends on that transport's own entry type.
pub trait ConsensusLogEntry: Send + Sync {
    fn index(&self) -> u64;
    fn batch(&self) -> &InstructionBatch;
}

/// A decoded batch paired with the log index it was committed at. The in-memory fake and most
/// real adapters can use this directly rather than defining their own type.
pub struct CommittedEntry {
    pub index: u64,
    pub batch: InstructionBatch,
}

impl ConsensusLogEntry for CommittedEntry {
    fn index(&self) -> u64 {
        self.index
    }

    fn batch(&self) -> &InstructionBatch {
        &self.batch
    }
}

/// The out-of-scope consensus log transport. The Pre-Committer submits batches through it and
/// awaits durability; the Operator Router polls it for the current leader.
#[async_trait]
pub trait ConsensusLog: Send + Sync {
    /// `None` if no leader is currently visible.
    async fn current_leader(&self) -> Option<PeerId>;

    /// Submits a batch for replication, resolving once it is durably committed with the log
    /// index it landed at. Never resolves to an index lower than a previously returned one.
    async fn submit(&self, batch: InstructionBatch) -> anyhow::Result<u64>;
}

/// The peer-to-peer RPC port used by a remote operator target to forward instructions to the
/// current leader. One method, matching the original's single-method `RemoteExecute` service.
#[async_trait]
pub trait LeaderRpc: Send + Sync {
    async fn execute(&self, instruction: Instruction) -> anyhow::Result<()>;
}
