// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Pre-Committer (component F): leader-side speculative execution ahead of consensus
//! replication.

use std::sync::Arc;
use std::time::Duration;

use canopy_tree::TreeState;
use canopy_types::{Instruction, InstructionBatch};
use tracing::{debug, warn};

use crate::config::PreCommitConfig;
use crate::error::ConsensusError;
use crate::ports::ConsensusLog;

const MAX_ROLLBACK_RETRIES: u32 = 5;

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(20u64.saturating_mul(1 << attempt.min(8)))
}

/// Wraps the leader's log-append path: pre-executes a raw instruction batch against Tree State,
/// rolls back immediately, then submits only the instructions that succeeded to the consensus
/// log. Pre-execution validates the batch and filters bad instructions before anything is
/// durably committed; rolling back first keeps the speculative run from leaking into the live
/// state ahead of consensus actually agreeing on it.
pub struct PreCommitter {
    tree: Arc<TreeState>,
    consensus_log: Arc<dyn ConsensusLog>,
    config: PreCommitConfig,
}

impl PreCommitter {
    pub fn new(
        tree: Arc<TreeState>,
        consensus_log: Arc<dyn ConsensusLog>,
        config: PreCommitConfig,
    ) -> Self {
        PreCommitter {
            tree,
            consensus_log,
            config,
        }
    }

    /// Pre-executes `instructions` in order, drops the ones that fail, and replicates the rest.
    /// Returns one result per input instruction, in the same order, so a caller multiplexing
    /// replies (the Packer) can match each back to its submitter.
    pub async fn commit(&self, instructions: Vec<Instruction>) -> Vec<Result<(), ConsensusError>> {
        let mut results: Vec<Result<(), ConsensusError>> = Vec::with_capacity(instructions.len());
        let mut kept = Vec::with_capacity(instructions.len());

        let mut section = self.tree.lock();
        let pre_snapshot_root = section.root_id();
        let pre_snapshot_index = section.applied_index();
        for instruction in &instructions {
            match section.execute_one(instruction) {
                Ok(()) => {
                    results.push(Ok(()));
                    kept.push(instruction.clone());
                }
                Err(e) => results.push(Err(ConsensusError::Tree(e))),
            }
        }
        let after = section.unlock();

        let pre_snapshot = canopy_tree::Snapshot {
            applied_index: pre_snapshot_index,
            root_id: pre_snapshot_root.clone(),
        };
        let mut attempt = 0u32;
        loop {
            match self.tree.rollback(&pre_snapshot) {
                Ok(()) => break,
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_ROLLBACK_RETRIES {
                        warn!(error = %e, "pre-commit rollback failed after retry cap, leaving state pre-committed");
                        break;
                    }
                    std::thread::sleep(backoff(attempt));
                }
            }
        }

        if kept.is_empty() {
            return results;
        }

        let batch = InstructionBatch {
            instructions: kept,
            pre_root: pre_snapshot_root,
            post_root: after.root_id,
        };
        debug!(count = batch.instructions.len(), "submitting pre-committed batch to consensus log");

        let outcome = match tokio::time::timeout(
            Duration::from_millis(self.config.consensus_timeout_ms),
            self.consensus_log.submit(batch),
        )
        .await
        {
            Ok(Ok(_index)) => Ok(()),
            Ok(Err(e)) => Err(ConsensusError::Other(e)),
            Err(_elapsed) => Err(ConsensusError::AppendTimeout),
        };

        for slot in results.iter_mut() {
            if slot.is_ok() {
                *slot = rebroadcast(&outcome);
            }
        }
        results
    }
}

/// `ConsensusError` can't derive `Clone` (it carries `anyhow::Error`), so a shared outcome is
/// re-synthesized per caller rather than cloned.
fn rebroadcast(outcome: &Result<(), ConsensusError>) -> Result<(), ConsensusError> {
    match outcome {
        Ok(()) => Ok(()),
        Err(ConsensusError::AppendTimeout) => Err(ConsensusError::AppendTimeout),
        Err(other) => Err(ConsensusError::Other(anyhow::anyhow!(other.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use canopy_tree::{InMemoryBlockStore, InMemoryStateDb};
    use canopy_types::{CpParams, CpSource, ContentId, MkdirParams, PeerId};
    use parking_lot::Mutex;

    struct ImmediateConsensusLog {
        next_index: Mutex<u64>,
    }

    impl Default for ImmediateConsensusLog {
        fn default() -> Self {
            ImmediateConsensusLog {
                next_index: Mutex::new(1),
            }
        }
    }

    #[async_trait]
    impl ConsensusLog for ImmediateConsensusLog {
        async fn current_leader(&self) -> Option<PeerId> {
            Some(PeerId::from("self"))
        }

        async fn submit(&self, _batch: InstructionBatch) -> anyhow::Result<u64> {
            let mut next = self.next_index.lock();
            let index = *next;
            *next += 1;
            Ok(index)
        }
    }

    struct NeverConsensusLog;

    #[async_trait]
    impl ConsensusLog for NeverConsensusLog {
        async fn current_leader(&self) -> Option<PeerId> {
            None
        }

        async fn submit(&self, _batch: InstructionBatch) -> anyhow::Result<u64> {
            std::future::pending().await
        }
    }

    fn new_tree() -> Arc<TreeState> {
        Arc::new(
            TreeState::new(
                Arc::new(InMemoryBlockStore::default()),
                Arc::new(InMemoryStateDb::default()),
                PeerId::from("self"),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn rolls_back_before_submitting_and_reports_success() {
        let tree = new_tree();
        let pre = tree.root_id();
        let committer = PreCommitter::new(
            tree.clone(),
            Arc::new(ImmediateConsensusLog::default()),
            PreCommitConfig::default(),
        );

        let results = committer
            .commit(vec![Instruction::Mkdir(MkdirParams { path: "/a".into() })])
            .await;
        assert!(results[0].is_ok());
        // the leader does not commit the mutation itself; only the Log FSM applying the
        // replicated entry does that.
        assert_eq!(tree.root_id(), pre);
    }

    #[tokio::test]
    async fn drops_failing_instructions_but_keeps_succeeding_ones() {
        let tree = new_tree();
        let committer = PreCommitter::new(
            tree.clone(),
            Arc::new(ImmediateConsensusLog::default()),
            PreCommitConfig::default(),
        );

        let bad_id = ContentId::for_bytes(b"wrong");
        let results = committer
            .commit(vec![
                Instruction::Mkdir(MkdirParams { path: "/ok".into() }),
                Instruction::Cp(CpParams {
                    dest_path: "/bad".into(),
                    source: CpSource::Block {
                        content_id: bad_id,
                        block_bytes: b"actual".to_vec(),
                    },
                }),
            ])
            .await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn append_timeout_is_reported_to_all_kept_callers() {
        let tree = new_tree();
        let mut config = PreCommitConfig::default();
        config.consensus_timeout_ms = 10;
        let committer = PreCommitter::new(tree, Arc::new(NeverConsensusLog), config);

        let results = committer
            .commit(vec![
                Instruction::Mkdir(MkdirParams { path: "/a".into() }),
                Instruction::Mkdir(MkdirParams { path: "/b".into() }),
            ])
            .await;
        assert!(matches!(results[0], Err(ConsensusError::AppendTimeout)));
        assert!(matches!(results[1], Err(ConsensusError::AppendTimeout)));
    }
}
