// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trait contracts for the collaborators this crate keeps out of scope: the content-addressed
//! block store (plus its pin API) and the embedded key-value store used for state metadata.
//!
//! Both ports are synchronous: tree mutation must stay deterministic and side-effect-ordered
//! across replicas, so `TreeState` never awaits inside `execute`. A real adapter wrapping an
//! async IPFS/KV client is expected to bridge with something like `tokio::task::block_in_place`,
//! the same way the teacher family keeps its `StorageRead`/`StorageWrite` traits synchronous
//! underneath an async executor.

use canopy_types::ContentId;

/// The content-addressed DAG service: raw block storage plus the pin/unpin API layered over it.
pub trait BlockStore: Send + Sync {
    /// Stores a block, keyed by its content id. Idempotent: storing the same id twice is a no-op.
    fn put(&self, id: &ContentId, bytes: &[u8]) -> anyhow::Result<()>;

    /// Fetches a previously stored block. Used by `TreeState::unmarshal` to rehydrate the tree
    /// from a snapshot's root id.
    fn get(&self, id: &ContentId) -> anyhow::Result<Vec<u8>>;

    /// Requests that this node host a replica of `id` locally. Idempotent at the block-store
    /// layer.
    fn pin(&self, id: &ContentId) -> anyhow::Result<()>;

    /// Releases a local pin. Idempotent.
    fn unpin(&self, id: &ContentId) -> anyhow::Result<()>;
}

/// The embedded key-value store used as opaque byte storage for tree-state metadata.
pub trait StateDb: Send + Sync {
    fn store_state(&self, bytes: &[u8]) -> anyhow::Result<()>;

    /// `None` when no state has ever been stored (fresh cluster genesis).
    fn load_state(&self) -> anyhow::Result<Option<Vec<u8>>>;
}

/// An in-memory `BlockStore`/`StateDb` pair for tests and single-process demos. Mirrors the role
/// `crust/client_test.go` and `consensus/state/ipfs_test.go` fakes play in the original source.
#[derive(Default)]
pub struct InMemoryBlockStore {
    blocks: parking_lot::Mutex<std::collections::HashMap<ContentId, Vec<u8>>>,
    pinned: parking_lot::Mutex<std::collections::HashSet<ContentId>>,
}

impl BlockStore for InMemoryBlockStore {
    fn put(&self, id: &ContentId, bytes: &[u8]) -> anyhow::Result<()> {
        self.blocks.lock().insert(id.clone(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, id: &ContentId) -> anyhow::Result<Vec<u8>> {
        self.blocks
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("block {id} not found"))
    }

    fn pin(&self, id: &ContentId) -> anyhow::Result<()> {
        self.pinned.lock().insert(id.clone());
        Ok(())
    }

    fn unpin(&self, id: &ContentId) -> anyhow::Result<()> {
        self.pinned.lock().remove(id);
        Ok(())
    }
}

impl InMemoryBlockStore {
    pub fn is_pinned(&self, id: &ContentId) -> bool {
        self.pinned.lock().contains(id)
    }
}

#[derive(Default)]
pub struct InMemoryStateDb {
    state: parking_lot::Mutex<Option<Vec<u8>>>,
}

impl StateDb for InMemoryStateDb {
    fn store_state(&self, bytes: &[u8]) -> anyhow::Result<()> {
        *self.state.lock() = Some(bytes.to_vec());
        Ok(())
    }

    fn load_state(&self) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.state.lock().clone())
    }
}
