// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Packer (component D): batches local submissions for a bounded time window before handing
//! them to the Pre-Committer as one batch.

use std::sync::Arc;
use std::time::Duration;

use canopy_types::Instruction;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use crate::config::PackerConfig;
use crate::pre_committer::PreCommitter;

struct PackerItem {
    instruction: Instruction,
    reply: oneshot::Sender<anyhow::Result<()>>,
}

/// Single-flusher, multi-producer batching queue in front of the [`PreCommitter`]. Cloning a
/// `Packer` handle is cheap; all clones share the same background flush task and queue.
#[derive(Clone)]
pub struct Packer {
    sender: mpsc::UnboundedSender<PackerItem>,
}

impl Packer {
    /// Spawns the background flush loop. The task runs until every `Packer` handle (and its
    /// clones) is dropped, at which point it drains and flushes whatever remains buffered.
    pub fn spawn(config: PackerConfig, committer: Arc<PreCommitter>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run(receiver, config, committer));
        Packer { sender }
    }

    /// Buffers `instruction`, then blocks until the enclosing batch either commits or fails. The
    /// happens-before guarantee is enforced by the flush loop: this call only enqueues, it never
    /// jumps ahead of items already buffered.
    pub async fn send(&self, instruction: Instruction) -> anyhow::Result<()> {
        let (reply, rx) = oneshot::channel();
        self.sender
            .send(PackerItem { instruction, reply })
            .map_err(|_| anyhow::anyhow!("packer flush loop has shut down"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("packer dropped this submission's reply channel"))?
    }
}

async fn run(
    mut receiver: mpsc::UnboundedReceiver<PackerItem>,
    config: PackerConfig,
    committer: Arc<PreCommitter>,
) {
    let mut buffer: Vec<PackerItem> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            item = receiver.recv() => {
                match item {
                    Some(item) => {
                        if buffer.is_empty() {
                            deadline = Some(Instant::now() + Duration::from_millis(config.flush_interval_ms));
                        }
                        buffer.push(item);
                        if buffer.len() >= config.flush_max_items {
                            flush(&mut buffer, &committer).await;
                            deadline = None;
                        }
                    }
                    None => {
                        if !buffer.is_empty() {
                            flush(&mut buffer, &committer).await;
                        }
                        return;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                flush(&mut buffer, &committer).await;
                deadline = None;
            }
        }
    }
}

async fn flush(buffer: &mut Vec<PackerItem>, committer: &Arc<PreCommitter>) {
    let items = std::mem::take(buffer);
    debug!(count = items.len(), "flushing packer batch to pre-committer");
    let instructions = items.iter().map(|i| i.instruction.clone()).collect();
    let results = committer.commit(instructions).await;
    for (item, result) in items.into_iter().zip(results) {
        let _ = item.reply.send(result.map_err(anyhow::Error::from));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use canopy_tree::{InMemoryBlockStore, InMemoryStateDb, TreeState};
    use canopy_types::{InstructionBatch, MkdirParams, PeerId};
    use parking_lot::Mutex;

    use crate::config::PreCommitConfig;
    use crate::ports::ConsensusLog;

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

    #[tokio::test]
    async fn flushes_on_size_threshold() {
        let tree = Arc::new(
            TreeState::new(
                Arc::new(InMemoryBlockStore::default()),
                Arc::new(InMemoryStateDb::default()),
                PeerId::from("self"),
            )
            .unwrap(),
        );
        let committer = Arc::new(PreCommitter::new(
            tree,
            Arc::new(ImmediateConsensusLog::default()),
            PreCommitConfig::default(),
        ));
        let mut config = PackerConfig::default();
        config.flush_max_items = 2;
        config.flush_interval_ms = 60_000;
        let packer = Packer::spawn(config, committer);

        let a = packer.send(Instruction::Mkdir(MkdirParams { path: "/a".into() }));
        let b = packer.send(Instruction::Mkdir(MkdirParams { path: "/b".into() }));
        let (ra, rb) = tokio::join!(a, b);
        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }

    #[tokio::test]
    async fn flushes_on_time_window() {
        let tree = Arc::new(
            TreeState::new(
                Arc::new(InMemoryBlockStore::default()),
                Arc::new(InMemoryStateDb::default()),
                PeerId::from("self"),
            )
            .unwrap(),
        );
        let committer = Arc::new(PreCommitter::new(
            tree,
            Arc::new(ImmediateConsensusLog::default()),
            PreCommitConfig::default(),
        ));
        let mut config = PackerConfig::default();
        config.flush_interval_ms = 20;
        config.flush_max_items = 100;
        let packer = Packer::spawn(config, committer);

        let result = packer
            .send(Instruction::Mkdir(MkdirParams { path: "/a".into() }))
            .await;
        assert!(result.is_ok());
    }
}
