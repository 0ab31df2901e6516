// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tree State: the replicated directory tree plus its pin tracker.
//!
//! `TreeState::execute` is the single place an `Instruction` is turned into a mutation, and it is
//! called identically by a leader during pre-commit and by every follower applying a committed
//! batch: execution must be a pure function of (current root, instruction) so that
//! independently-replayed history converges. The only side channel is the block store, used for
//! `CP`'s raw-block variant and for pin/unpin, both of which are themselves idempotent.

use std::collections::BTreeMap;
use std::sync::Arc;

use canopy_types::{
    ClusterError, ContentId, Instruction, InstructionBatch, ListingEntry, PeerId, TreeError,
};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::dir::DirNode;
use crate::path::split_absolute;
use crate::ports::{BlockStore, StateDb};

/// Tracking record for a single pinned content id. Kept as a field of `TreeState` rather than a
/// standalone component: the pin set is part of the replicated state and must converge the same
/// way the directory tree does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRecord {
    pub replica_peers: Vec<PeerId>,
    pub pinned_locally: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct TreeInner {
    applied_index: u64,
    root: DirNode,
    pin_tasks: BTreeMap<ContentId, PinRecord>,
}

impl Default for TreeInner {
    fn default() -> Self {
        TreeInner {
            applied_index: 0,
            root: DirNode::default(),
            pin_tasks: BTreeMap::new(),
        }
    }
}

/// The committed-state summary handed back to the leader's Pre-Committer after `unlock`. Small
/// and `Copy`-ish on purpose: it is what gets compared against a follower's independently
/// computed root to detect divergence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub applied_index: u64,
    pub root_id: ContentId,
}

/// The replicated directory tree and its pin tracker.
///
/// Mutation only ever happens through [`TreeState::lock`], which returns an [`ExclusiveSection`]
/// guard — the RAII replacement for the original's manual `mtx.Lock()`/`mtx.Unlock()` pair. The
/// non-overlapping-pre-commit invariant means at most one `ExclusiveSection` can exist at a time;
/// `parking_lot::Mutex` enforces that directly.
pub struct TreeState {
    inner: Mutex<TreeInner>,
    pending_rollback: Mutex<Option<(u64, TreeInner)>>,
    /// The result of the most recent pre-commit section, keyed by `(pre_root, post_root)`,
    /// kept around so the Log FSM can promote straight to it instead of re-running the batch's
    /// instructions when the leader's own entry comes back through the log. Pre-commit always
    /// rolls the live root back to `pre_root` before submitting, so without this cache "skip
    /// re-execution" would have nothing to promote to.
    pending_precommit: Mutex<Option<(ContentId, ContentId, TreeInner)>>,
    block_store: Arc<dyn BlockStore>,
    state_db: Arc<dyn StateDb>,
    this_node: PeerId,
}

impl TreeState {
    /// Rehydrates from `state_db` if it holds a prior snapshot, otherwise starts at an empty
    /// tree with `applied_index = 0` (cluster genesis). `this_node` is this node's own id, used
    /// to decide whether a `Pin`/`Unpin` instruction applies to this node's local block store.
    pub fn new(
        block_store: Arc<dyn BlockStore>,
        state_db: Arc<dyn StateDb>,
        this_node: PeerId,
    ) -> anyhow::Result<Self> {
        let inner = match state_db.load_state()? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => TreeInner::default(),
        };
        Ok(TreeState {
            inner: Mutex::new(inner),
            pending_rollback: Mutex::new(None),
            pending_precommit: Mutex::new(None),
            block_store,
            state_db,
            this_node,
        })
    }

    pub fn applied_index(&self) -> u64 {
        self.inner.lock().applied_index
    }

    pub fn root_id(&self) -> ContentId {
        self.inner.lock().root.content_id()
    }

    /// Acquires the exclusive section used to apply one instruction batch. Blocks if another
    /// section is already open, which under the non-overlap invariant should never actually
    /// contend in steady state.
    pub fn lock(&self) -> ExclusiveSection<'_> {
        let guard = self.inner.lock();
        let pre_state = guard.clone();
        ExclusiveSection {
            guard,
            outer: self,
            pre_state,
        }
    }

    /// Reverts to the state captured just before the section that produced `snapshot`, unless
    /// the tree has already advanced past it (someone else committed in the meantime, or this is
    /// a stale/duplicate rollback request) — in which case it is a no-op.
    pub fn rollback(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if inner.applied_index != snapshot.applied_index {
            return Ok(());
        }
        if let Some((idx, pre_state)) = self.pending_rollback.lock().take() {
            if idx == snapshot.applied_index {
                *inner = pre_state;
            }
        }
        Ok(())
    }

    /// Persists the current committed state to the key-value store. Does not touch the block
    /// store: blocks are written as they're created during `execute`, not batched here.
    pub fn flush(&self) -> anyhow::Result<()> {
        let inner = self.inner.lock();
        let bytes = serde_json::to_vec(&*inner)?;
        self.state_db.store_state(&bytes)
    }

    /// Lists a directory, or returns the single-entry listing of a file at `path`.
    pub fn ls(&self, path: &str) -> Result<Vec<ListingEntry>, TreeError> {
        let segments = split_absolute(path)?;
        self.inner.lock().root.ls(&segments)
    }

    /// Resolves a single path to its content id, size, and whether it's a directory.
    pub fn stat(&self, path: &str) -> Result<(ContentId, u64, bool), TreeError> {
        let segments = split_absolute(path)?;
        self.inner.lock().root.stat(&segments)
    }

    /// Fetches a block already resident in the block store, for callers (the HTTP front end's
    /// `/itscp` handler) that reference a `cid` uploaded out of band rather than a tree path.
    pub fn read_block(&self, content_id: &ContentId) -> anyhow::Result<Vec<u8>> {
        self.block_store.get(content_id)
    }

    /// Walks the whole subtree at `path` and confirms every file it references is actually
    /// retrievable from the block store, rather than stopping at the first level confirmed
    /// resident.
    pub fn ensure_stored(&self, path: &str) -> anyhow::Result<()> {
        let segments = split_absolute(path)?;
        let inner = self.inner.lock();
        let (_, _, is_dir) = inner.root.stat(&segments)?;
        if !is_dir {
            let (content_id, ..) = inner.root.stat(&segments)?;
            self.block_store.get(&content_id)?;
            return Ok(());
        }
        let dir_listing = inner.root.list_dir(&segments)?;
        drop(inner);
        for entry in dir_listing {
            let child_path = format!("{}/{}", path.trim_end_matches('/'), entry.name);
            self.ensure_stored(&child_path)?;
        }
        Ok(())
    }

    /// The replica set currently pinning `content_id`, if any. The HTTP front end joins this
    /// against each listing entry's hash; `canopy-tree` itself never shapes HTTP responses.
    pub fn pin_record(&self, content_id: &ContentId) -> Option<PinRecord> {
        self.inner.lock().pin_tasks.get(content_id).cloned()
    }
}

/// Selects `count` distinct peers for a new pin, by XOR distance between each peer id and the
/// content id, comparing the longest matching bit prefix. A pure free function: it has no state
/// of its own and does not belong to any one component.
pub fn select_replicas(
    content_id: &ContentId,
    candidates: &[PeerId],
    count: usize,
) -> Result<Vec<PeerId>, ClusterError> {
    if candidates.len() < count {
        return Err(ClusterError::InsufficientNodes {
            requested: count,
            available: candidates.len(),
        });
    }
    let target = content_id.as_bytes();
    let mut ranked: Vec<&PeerId> = candidates.iter().collect();
    ranked.sort_by(|a, b| {
        let da = matching_prefix_bits(target, a.as_bytes());
        let db = matching_prefix_bits(target, b.as_bytes());
        db.cmp(&da).then_with(|| a.as_str().cmp(b.as_str()))
    });
    Ok(ranked.into_iter().take(count).cloned().collect())
}

/// Number of leading bits that agree between two byte strings, comparing only up to the shorter
/// length. Used instead of a byte-granularity prefix match so peer/content ids that share most
/// but not all of a leading byte still rank ahead of ones that share none of it.
fn matching_prefix_bits(a: &[u8], b: &[u8]) -> u32 {
    let mut bits = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        let diff = x ^ y;
        if diff == 0 {
            bits += 8;
            continue;
        }
        bits += diff.leading_zeros();
        break;
    }
    bits
}

/// The RAII guard returned by [`TreeState::lock`]. Replaces the original's manual
/// `mtx.Lock()`/`Execute(...)`/`mtx.Unlock()` triple: the mutex is held for the guard's lifetime
/// and released automatically when [`ExclusiveSection::unlock`] (or an ordinary `drop`) consumes
/// it.
pub struct ExclusiveSection<'a> {
    guard: MutexGuard<'a, TreeInner>,
    outer: &'a TreeState,
    pre_state: TreeInner,
}

impl<'a> ExclusiveSection<'a> {
    pub fn root_id(&self) -> ContentId {
        self.guard.root.content_id()
    }

    pub fn applied_index(&self) -> u64 {
        self.guard.applied_index
    }

    /// Applies every instruction in `batch` in order. On the first failure, the section is left
    /// holding whatever partial mutation happened — callers are expected to `unlock` and then
    /// `rollback` the returned snapshot rather than attempt to salvage a partial batch, matching
    /// the all-or-nothing pre-commit contract.
    pub fn execute(&mut self, batch: &InstructionBatch) -> Result<(), TreeError> {
        for instruction in &batch.instructions {
            self.execute_one(instruction)?;
        }
        Ok(())
    }

    /// Sets `applied_index` to the consensus log index this section's effects are now attributed
    /// to. Only the Log FSM calls this; the Pre-Committer's speculative
    /// `lock()/execute()/unlock()` never advances it, since the leader does not commit state
    /// until its own entry comes back through the Log FSM like any other replica's.
    pub fn set_applied_index(&mut self, index: u64) {
        self.guard.applied_index = index;
    }

    /// Promotes this section's root and pin tasks directly to the cached result of a prior
    /// pre-commit that produced `(pre_root, post_root)`, instead of replaying `batch`'s
    /// instructions: the leader has already pre-executed it, so re-execution can be skipped.
    /// Returns `false` (leaving the section untouched) if the current root isn't `pre_root` or no
    /// matching cache entry exists, in which case the caller must fall back to `execute`.
    pub fn try_fast_forward(&mut self, pre_root: &ContentId, post_root: &ContentId) -> bool {
        if self.guard.root.content_id() != *pre_root {
            return false;
        }
        let cached = self.outer.pending_precommit.lock().take();
        match cached {
            Some((cached_pre, cached_post, cached_inner))
                if cached_pre == *pre_root && cached_post == *post_root =>
            {
                self.guard.root = cached_inner.root;
                self.guard.pin_tasks = cached_inner.pin_tasks;
                true
            }
            other => {
                *self.outer.pending_precommit.lock() = other;
                false
            }
        }
    }

    /// Applies a single instruction, independent of the rest of any batch. The Pre-Committer
    /// uses this directly (rather than [`Self::execute`]) so a bad instruction in a raw,
    /// not-yet-filtered submission can be recorded and dropped without discarding its siblings.
    pub fn execute_one(&mut self, instruction: &Instruction) -> Result<(), TreeError> {
        match instruction {
            Instruction::Cp(params) => self.exec_cp(params),
            Instruction::Mv(params) => {
                let src = split_absolute(&params.src_path)?;
                let dst = split_absolute(&params.dst_path)?;
                self.guard.root.mv(&src, &dst)
            }
            Instruction::Rm(params) => {
                let path = split_absolute(&params.path)?;
                self.guard.root.rm(&path)
            }
            Instruction::Mkdir(params) => {
                let path = split_absolute(&params.path)?;
                self.guard.root.mkdir(&path)
            }
            Instruction::Pin(params) => self.exec_pin(params),
            Instruction::Unpin(params) => self.exec_unpin(params),
        }
    }

    fn exec_cp(&mut self, params: &canopy_types::CpParams) -> Result<(), TreeError> {
        let dest = split_absolute(&params.dest_path)?;
        let (content_id, size) = match &params.source {
            canopy_types::CpSource::Path(src_path) => {
                let src = split_absolute(src_path)?;
                let (content_id, size, _is_dir) = self.guard.root.stat(&src)?;
                (content_id, size)
            }
            canopy_types::CpSource::Block {
                content_id,
                block_bytes,
            } => {
                if !content_id.verify(block_bytes) {
                    return Err(TreeError::BadBlock(content_id.clone()));
                }
                self.outer
                    .block_store
                    .put(content_id, block_bytes)
                    .map_err(|e| TreeError::Internal(e.to_string()))?;
                (content_id.clone(), block_bytes.len() as u64)
            }
        };
        self.guard.root.put_file(&dest, content_id, size)
    }

    /// `replica_peers` is replicated state, visible identically on every node; only the local
    /// block-store pin (and the `pinned_locally` flag) is conditional on this node's id actually
    /// appearing in it. A node outside the replica set still records the pin task and still
    /// materializes `dest_path` (the bytes were already written to every node's block store by a
    /// prior block-sourced `Cp`), it just never asks its own block store to host a replica.
    fn exec_pin(&mut self, params: &canopy_types::PinParams) -> Result<(), TreeError> {
        let pinned_locally = params.replica_peers.contains(&self.outer.this_node);
        if pinned_locally {
            self.outer
                .block_store
                .pin(&params.content_id)
                .map_err(|e| TreeError::Internal(e.to_string()))?;
        }
        self.guard.pin_tasks.insert(
            params.content_id.clone(),
            PinRecord {
                replica_peers: params.replica_peers.clone(),
                pinned_locally,
            },
        );
        if let Some(dest_path) = &params.dest_path {
            let bytes = self
                .outer
                .block_store
                .get(&params.content_id)
                .map_err(|e| TreeError::Internal(e.to_string()))?;
            let dest = split_absolute(dest_path)?;
            self.guard
                .root
                .put_file(&dest, params.content_id.clone(), bytes.len() as u64)?;
        }
        Ok(())
    }

    fn exec_unpin(&mut self, params: &canopy_types::UnpinParams) -> Result<(), TreeError> {
        let was_local = self
            .guard
            .pin_tasks
            .get(&params.content_id)
            .is_some_and(|r| r.pinned_locally);
        if was_local {
            self.outer
                .block_store
                .unpin(&params.content_id)
                .map_err(|e| TreeError::Internal(e.to_string()))?;
        }
        self.guard.pin_tasks.remove(&params.content_id);
        Ok(())
    }

    /// Releases the section and returns a [`Snapshot`] of the now-committed state, stashing the
    /// pre-section state so a subsequent [`TreeState::rollback`] can undo it if the leader's
    /// batch fails to reach quorum.
    pub fn unlock(self) -> Snapshot {
        let snapshot = Snapshot {
            applied_index: self.guard.applied_index,
            root_id: self.guard.root.content_id(),
        };
        *self.outer.pending_precommit.lock() = Some((
            self.pre_state.root.content_id(),
            snapshot.root_id.clone(),
            self.guard.clone(),
        ));
        *self.outer.pending_rollback.lock() = Some((snapshot.applied_index, self.pre_state));
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{InMemoryBlockStore, InMemoryStateDb};
    use canopy_types::{CpParams, CpSource, MkdirParams, PinParams};

    fn new_tree() -> TreeState {
        TreeState::new(
            Arc::new(InMemoryBlockStore::default()),
            Arc::new(InMemoryStateDb::default()),
            PeerId::from("self"),
        )
        .unwrap()
    }

    fn batch(instructions: Vec<Instruction>, pre_root: ContentId, post_root: ContentId) -> InstructionBatch {
        InstructionBatch {
            instructions,
            pre_root,
            post_root,
        }
    }

    #[test]
    fn execute_mkdir_and_cp_block() {
        let tree = new_tree();
        let mut section = tree.lock();
        let pre = section.root_id();
        let bytes = b"hello world".to_vec();
        let content_id = ContentId::for_bytes(&bytes);
        section
            .execute(&batch(
                vec![
                    Instruction::Mkdir(MkdirParams {
                        path: "/docs".into(),
                    }),
                    Instruction::Cp(CpParams {
                        dest_path: "/docs/hello.txt".into(),
                        source: CpSource::Block {
                            content_id: content_id.clone(),
                            block_bytes: bytes,
                        },
                    }),
                ],
                pre,
                content_id.clone(),
            ))
            .unwrap();
        section.set_applied_index(1);
        let snapshot = section.unlock();
        assert_eq!(snapshot.applied_index, 1);

        let listing = tree.ls("/docs").unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].name, "hello.txt");
        assert_eq!(listing[0].hash, content_id);
    }

    #[test]
    fn rejects_mismatched_block_hash() {
        let tree = new_tree();
        let mut section = tree.lock();
        let wrong_id = ContentId::for_bytes(b"not this");
        let err = section
            .execute(&batch(
                vec![Instruction::Cp(CpParams {
                    dest_path: "/f".into(),
                    source: CpSource::Block {
                        content_id: wrong_id.clone(),
                        block_bytes: b"actual bytes".to_vec(),
                    },
                })],
                tree.root_id(),
                tree.root_id(),
            ))
            .unwrap_err();
        assert_eq!(err, TreeError::BadBlock(wrong_id));
    }

    #[test]
    fn rollback_restores_pre_section_state() {
        let tree = new_tree();
        let pre_root = tree.root_id();
        let mut section = tree.lock();
        section
            .execute(&batch(
                vec![Instruction::Mkdir(MkdirParams { path: "/a".into() })],
                pre_root.clone(),
                tree.root_id(),
            ))
            .unwrap();
        section.set_applied_index(1);
        let snapshot = section.unlock();
        assert_ne!(tree.root_id(), pre_root);

        tree.rollback(&snapshot).unwrap();
        assert_eq!(tree.root_id(), pre_root);
        assert_eq!(tree.applied_index(), 0);
    }

    #[test]
    fn rollback_is_noop_once_advanced_past() {
        let tree = new_tree();
        let mut section = tree.lock();
        section
            .execute(&batch(
                vec![Instruction::Mkdir(MkdirParams { path: "/a".into() })],
                tree.root_id(),
                tree.root_id(),
            ))
            .unwrap();
        section.set_applied_index(1);
        let stale_snapshot = section.unlock();

        let mut section2 = tree.lock();
        section2
            .execute(&batch(
                vec![Instruction::Mkdir(MkdirParams { path: "/b".into() })],
                tree.root_id(),
                tree.root_id(),
            ))
            .unwrap();
        section2.set_applied_index(2);
        section2.unlock();

        tree.rollback(&stale_snapshot).unwrap();
        assert!(tree.ls("/a").is_ok());
        assert!(tree.ls("/b").is_ok());
    }

    #[test]
    fn flush_then_reload_preserves_state() {
        let block_store = Arc::new(InMemoryBlockStore::default());
        let state_db = Arc::new(InMemoryStateDb::default());
        let tree = TreeState::new(block_store.clone(), state_db.clone(), PeerId::from("self")).unwrap();
        let mut section = tree.lock();
        section
            .execute(&batch(
                vec![Instruction::Mkdir(MkdirParams { path: "/a".into() })],
                tree.root_id(),
                tree.root_id(),
            ))
            .unwrap();
        section.set_applied_index(1);
        section.unlock();
        tree.flush().unwrap();

        let reloaded = TreeState::new(block_store, state_db, PeerId::from("self")).unwrap();
        assert_eq!(reloaded.root_id(), tree.root_id());
        assert_eq!(reloaded.applied_index(), 1);
    }

    #[test]
    fn ensure_stored_detects_missing_block() {
        let block_store = Arc::new(InMemoryBlockStore::default());
        let state_db = Arc::new(InMemoryStateDb::default());
        let tree = TreeState::new(block_store.clone(), state_db, PeerId::from("self")).unwrap();
        let bytes = b"payload".to_vec();
        let content_id = ContentId::for_bytes(&bytes);
        let mut section = tree.lock();
        section
            .execute(&batch(
                vec![Instruction::Cp(CpParams {
                    dest_path: "/f".into(),
                    source: CpSource::Block {
                        content_id: content_id.clone(),
                        block_bytes: bytes,
                    },
                })],
                tree.root_id(),
                tree.root_id(),
            ))
            .unwrap();
        section.unlock();

        assert!(tree.ensure_stored("/f").is_ok());

        // a block store that never saw the put demonstrates ensure_stored actually walks and
        // checks every file, rather than trusting the tree structure alone.
        let amnesiac_store = InMemoryBlockStore::default();
        assert!(tree
            .inner
            .lock()
            .root
            .ensure_stored(&amnesiac_store)
            .is_err());
    }

    #[test]
    fn pin_then_copy_materializes_path() {
        let tree = new_tree();
        let bytes = b"pinned content".to_vec();
        let content_id = ContentId::for_bytes(&bytes);
        tree_put_raw_block(&tree, &content_id, &bytes);

        let mut section = tree.lock();
        section
            .execute(&batch(
                vec![Instruction::Pin(PinParams {
                    content_id: content_id.clone(),
                    replica_peers: vec![],
                    dest_path: Some("/pinned/copy.bin".into()),
                })],
                tree.root_id(),
                tree.root_id(),
            ))
            .unwrap();
        section.unlock();

        let listing = tree.ls("/pinned").unwrap();
        assert_eq!(listing[0].hash, content_id);
    }

    fn tree_put_raw_block(tree: &TreeState, content_id: &ContentId, bytes: &[u8]) {
        tree.block_store.put(content_id, bytes).unwrap();
    }

    #[test]
    fn pin_only_hosts_a_local_replica_when_this_node_is_selected() {
        let block_store = Arc::new(InMemoryBlockStore::default());
        let this_node = PeerId::from("self");
        let tree = TreeState::new(
            block_store.clone(),
            Arc::new(InMemoryStateDb::default()),
            this_node.clone(),
        )
        .unwrap();
        let bytes = b"pinned content".to_vec();
        let content_id = ContentId::for_bytes(&bytes);
        tree_put_raw_block(&tree, &content_id, &bytes);

        let mut section = tree.lock();
        section
            .execute(&batch(
                vec![Instruction::Pin(PinParams {
                    content_id: content_id.clone(),
                    replica_peers: vec![PeerId::from("other")],
                    dest_path: None,
                })],
                tree.root_id(),
                tree.root_id(),
            ))
            .unwrap();
        section.unlock();

        assert!(!block_store.is_pinned(&content_id));
        let record = tree.pin_record(&content_id).unwrap();
        assert!(!record.pinned_locally);
        assert_eq!(record.replica_peers, vec![PeerId::from("other")]);

        let mut section = tree.lock();
        section
            .execute(&batch(
                vec![Instruction::Pin(PinParams {
                    content_id: content_id.clone(),
                    replica_peers: vec![this_node],
                    dest_path: None,
                })],
                tree.root_id(),
                tree.root_id(),
            ))
            .unwrap();
        section.unlock();

        assert!(block_store.is_pinned(&content_id));
        assert!(tree.pin_record(&content_id).unwrap().pinned_locally);

        let mut section = tree.lock();
        section
            .execute(&batch(
                vec![Instruction::Unpin(canopy_types::UnpinParams {
                    content_id: content_id.clone(),
                })],
                tree.root_id(),
                tree.root_id(),
            ))
            .unwrap();
        section.unlock();

        assert!(!block_store.is_pinned(&content_id));
    }

    #[test]
    fn replica_selection_is_deterministic_and_errors_when_short() {
        let content_id = ContentId::for_bytes(b"some content");
        let peers: Vec<PeerId> = (0..5).map(|i| PeerId::from(format!("peer-{i}"))).collect();
        let a = select_replicas(&content_id, &peers, 3).unwrap();
        let b = select_replicas(&content_id, &peers, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);

        let err = select_replicas(&content_id, &peers, 10).unwrap_err();
        assert_eq!(
            err,
            ClusterError::InsufficientNodes {
                requested: 10,
                available: 5
            }
        );
    }
}
