// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! External collaborators the dealer never owns directly: the blockchain storage market and the
//! embedded key-value store backing the order store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use canopy_types::ContentId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ChainError;

/// A storage-market's view of one file, as returned by `get_file_info`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Chain height at which the current lease expires; `0` means "order placed, not yet
    /// calculated".
    pub expired_on: u64,
    /// Chain height at which the market last recalculated this file's lease.
    pub calculated_at: u64,
}

/// The two chain operations the dealer needs. Transient failures (timeouts, RPC errors) are
/// distinguished from `ChainError::CidNotFound`, since the state machine treats them differently
/// at every state.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn place_storage_order(&self, content_id: &ContentId, file_size: u64) -> anyhow::Result<()>;
    async fn get_file_info(&self, content_id: &ContentId) -> Result<FileInfo, ChainError>;
}

/// Reads the external chain's current block height, independent of any single file's state
/// machine.
#[async_trait]
pub trait HeightSource: Send + Sync {
    async fn current_height(&self) -> anyhow::Result<u64>;
}

/// Backing storage for the order store's reference counts. Kept as its own narrow port rather
/// than reusing `canopy_tree::StateDb`, since the dealer needs per-key read-modify-write and
/// enumeration, not a single opaque blob.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>>;
}

#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryChainClient {
    files: Mutex<BTreeMap<String, FileInfo>>,
    height: AtomicU64,
}

impl InMemoryChainClient {
    /// Test/demo seam: injects a `file_info` response as if the market had already calculated
    /// it, without going through `place_storage_order`.
    pub fn seed(&self, content_id: &ContentId, info: FileInfo) {
        self.files.lock().insert(content_id.as_str().to_string(), info);
    }
}

/// Stand-in for the real chain RPC client's height query. Advances by one every call, so a
/// long-running node still sees the dealer's RENEW/ACCEPTED transitions progress instead of a
/// height frozen at zero forever.
#[async_trait]
impl HeightSource for InMemoryChainClient {
    async fn current_height(&self) -> anyhow::Result<u64> {
        Ok(self.height.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl ChainClient for InMemoryChainClient {
    async fn place_storage_order(&self, content_id: &ContentId, _file_size: u64) -> anyhow::Result<()> {
        self.files
            .lock()
            .entry(content_id.as_str().to_string())
            .or_insert(FileInfo {
                expired_on: 0,
                calculated_at: 0,
            });
        Ok(())
    }

    async fn get_file_info(&self, content_id: &ContentId) -> Result<FileInfo, ChainError> {
        self.files
            .lock()
            .get(content_id.as_str())
            .copied()
            .ok_or_else(|| ChainError::CidNotFound(content_id.clone()))
    }
}
