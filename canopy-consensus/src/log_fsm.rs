// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Log FSM (component C): the adapter that turns committed consensus-log entries into Tree
//! State mutations, in strict index order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canopy_tree::TreeState;
use tracing::{debug, warn};

use crate::error::ConsensusError;
use crate::ports::ConsensusLogEntry;

const MAX_APPLY_RETRIES: u32 = 5;
const MAX_FLUSH_RETRIES: u32 = 5;

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(20u64.saturating_mul(1 << attempt.min(8)))
}

/// Applies committed log entries to a [`TreeState`], tracking the `inconsistent` flag that
/// permanently refuses new writes once raised.
pub struct LogFsm {
    tree: Arc<TreeState>,
    inconsistent: AtomicBool,
}

impl LogFsm {
    pub fn new(tree: Arc<TreeState>) -> Self {
        LogFsm {
            tree,
            inconsistent: AtomicBool::new(false),
        }
    }

    pub fn is_inconsistent(&self) -> bool {
        self.inconsistent.load(Ordering::SeqCst)
    }

    /// Applies one committed entry. `is_leader` distinguishes the leader's own entry coming back
    /// through the log (where it may already have been pre-executed by the Pre-Committer, in
    /// which case re-execution is skipped) from a follower applying it for the first time.
    pub fn apply(
        &self,
        entry: &dyn ConsensusLogEntry,
        is_leader: bool,
    ) -> Result<(), ConsensusError> {
        let index = entry.index();
        let batch = entry.batch();
        let applied_index = self.tree.applied_index();

        if index < applied_index {
            self.inconsistent.store(true, Ordering::SeqCst);
            return Err(ConsensusError::Inconsistent {
                index,
                applied_index,
            });
        }
        if index == applied_index {
            self.inconsistent.store(false, Ordering::SeqCst);
            debug!(index, "duplicate log index replay treated as no-op");
            return Ok(());
        }

        let pre_root = self.tree.root_id();
        let mut attempt = 0u32;
        let after = loop {
            let mut section = self.tree.lock();
            let fast_forwarded =
                is_leader && section.try_fast_forward(&batch.pre_root, &batch.post_root);
            let exec_result = if fast_forwarded {
                Ok(())
            } else {
                section.execute(batch)
            };
            match exec_result {
                Ok(()) => {
                    section.set_applied_index(index);
                    break section.unlock();
                }
                Err(source) => {
                    let snapshot = section.unlock();
                    let _ = self.tree.rollback(&snapshot);
                    attempt += 1;
                    if attempt >= MAX_APPLY_RETRIES {
                        self.inconsistent.store(true, Ordering::SeqCst);
                        return Err(ConsensusError::ApplyFailed {
                            index,
                            attempts: attempt,
                            source,
                        });
                    }
                    std::thread::sleep(backoff(attempt));
                }
            }
        };

        let mut flush_attempt = 0u32;
        loop {
            match self.tree.flush() {
                Ok(()) => break,
                Err(source) => {
                    flush_attempt += 1;
                    if flush_attempt >= MAX_FLUSH_RETRIES {
                        return Err(ConsensusError::FlushFailed {
                            index,
                            attempts: flush_attempt,
                            source,
                        });
                    }
                    std::thread::sleep(backoff(flush_attempt));
                }
            }
        }

        let diverged = (pre_root != batch.pre_root && !is_leader) || after.root_id != batch.post_root;
        if diverged {
            warn!(
                index,
                expected_post_root = %batch.post_root,
                actual_post_root = %after.root_id,
                "tree root diverged from leader's recorded post_root"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_tree::{InMemoryBlockStore, InMemoryStateDb};
    use canopy_types::{ContentId, Instruction, InstructionBatch, MkdirParams, PeerId};
    use std::sync::Arc;

    use crate::ports::CommittedEntry;

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

    fn mkdir_batch(path: &str, pre_root: ContentId, post_root: ContentId) -> InstructionBatch {
        InstructionBatch {
            instructions: vec![Instruction::Mkdir(MkdirParams { path: path.into() })],
            pre_root,
            post_root,
        }
    }

    #[test]
    fn applies_in_order_and_advances_index() {
        let tree = new_tree();
        let fsm = LogFsm::new(tree.clone());
        let pre = tree.root_id();
        let entry = CommittedEntry {
            index: 1,
            batch: mkdir_batch("/a", pre, tree.root_id()),
        };
        fsm.apply(&entry, false).unwrap();
        assert_eq!(tree.applied_index(), 1);
        assert!(!fsm.is_inconsistent());
    }

    #[test]
    fn duplicate_index_is_a_noop() {
        let tree = new_tree();
        let fsm = LogFsm::new(tree.clone());
        let entry = CommittedEntry {
            index: 1,
            batch: mkdir_batch("/a", tree.root_id(), tree.root_id()),
        };
        fsm.apply(&entry, false).unwrap();
        let root_after_first = tree.root_id();

        let duplicate = CommittedEntry {
            index: 1,
            batch: mkdir_batch("/b", tree.root_id(), tree.root_id()),
        };
        fsm.apply(&duplicate, false).unwrap();
        assert_eq!(tree.root_id(), root_after_first);
    }

    #[test]
    fn regressed_index_marks_inconsistent() {
        let tree = new_tree();
        let fsm = LogFsm::new(tree.clone());
        let entry = CommittedEntry {
            index: 5,
            batch: mkdir_batch("/a", tree.root_id(), tree.root_id()),
        };
        fsm.apply(&entry, false).unwrap();

        let stale = CommittedEntry {
            index: 2,
            batch: mkdir_batch("/b", tree.root_id(), tree.root_id()),
        };
        let err = fsm.apply(&stale, false).unwrap_err();
        assert!(matches!(err, ConsensusError::Inconsistent { .. }));
        assert!(fsm.is_inconsistent());
    }

    #[test]
    fn leader_re_delivery_fast_forwards_from_precommit_cache() {
        let tree = new_tree();
        let fsm = LogFsm::new(tree.clone());
        let pre = tree.root_id();

        // emulate the Pre-Committer: lock, execute speculatively, unlock, then roll back before
        // submitting to the log.
        let mut section = tree.lock();
        section
            .execute(&mkdir_batch("/a", pre.clone(), tree.root_id()))
            .unwrap();
        let pre_commit_snapshot = section.unlock();
        tree.rollback(&pre_commit_snapshot).unwrap();
        assert_eq!(tree.root_id(), pre, "pre-commit must roll back before submission");

        let entry = CommittedEntry {
            index: 1,
            batch: mkdir_batch("/a", pre.clone(), pre_commit_snapshot.root_id.clone()),
        };
        fsm.apply(&entry, true).unwrap();
        assert_eq!(tree.applied_index(), 1);
        assert_eq!(tree.root_id(), pre_commit_snapshot.root_id);
    }
}
