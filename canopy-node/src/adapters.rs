// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Concrete wiring of the out-of-scope ports: `canopy-node` is the only crate allowed to assume
//! a concrete wiring of those ports. A real deployment's consensus transport, libp2p host, and
//! chain RPC client are themselves non-goals; this module provides the smallest adapters that
//! let a single bootstrap node run end to end, and is the seam a real transport would be dropped
//! into.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use canopy_consensus::ports::{CommittedEntry, ConsensusLog, LeaderRpc};
use canopy_consensus::{LogFsm, OperatorRouter, RpcConnector};
use canopy_dealer::ports::KvStore;
use canopy_tree::StateDb;
use canopy_types::{Instruction, InstructionBatch, PeerId};
use parking_lot::Mutex;

/// Stands in for the real consensus log transport on a single-member cluster: every submission
/// is applied locally and immediately, with an ever-increasing index. A multi-member deployment
/// replaces this with an adapter over the real transport; `LogFsm::apply`'s contract (index +
/// decoded batch) does not change.
pub struct SingleNodeConsensusLog {
    this_node: PeerId,
    log_fsm: Arc<LogFsm>,
    next_index: AtomicU64,
}

impl SingleNodeConsensusLog {
    pub fn new(this_node: PeerId, log_fsm: Arc<LogFsm>) -> Self {
        SingleNodeConsensusLog {
            this_node,
            log_fsm,
            next_index: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ConsensusLog for SingleNodeConsensusLog {
    async fn current_leader(&self) -> Option<PeerId> {
        Some(self.this_node.clone())
    }

    async fn submit(&self, batch: InstructionBatch) -> anyhow::Result<u64> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let entry = CommittedEntry { index, batch };
        self.log_fsm
            .apply(&entry, true)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        Ok(index)
    }
}

/// No remote peers are reachable without a real libp2p/RPC transport.
/// `OperatorRouter::try_switch` is never called on the bootstrap path, so this only guards
/// against a future multi-member wiring forgetting to supply a real connector.
pub struct UnimplementedConnector;

#[async_trait]
impl RpcConnector for UnimplementedConnector {
    async fn connect(&self, leader: &PeerId) -> anyhow::Result<Arc<dyn LeaderRpc>> {
        Err(anyhow::anyhow!(
            "no peer-to-peer transport configured, cannot connect to leader {leader}"
        ))
    }
}

/// Used only if a future caller asks the `OperatorRouter` to dispatch while pointed at a
/// (currently impossible) remote target.
pub struct UnreachableLeaderRpc;

#[async_trait]
impl LeaderRpc for UnreachableLeaderRpc {
    async fn execute(&self, _instruction: Instruction) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("no remote leader reachable"))
    }
}

/// `StateDb` adapter over a single JSON file on disk — the concrete stand-in for the embedded
/// key-value store (out of scope as a concrete engine, in scope as a port).
pub struct FileStateDb {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStateDb {
    pub fn new(path: PathBuf) -> Self {
        FileStateDb {
            path,
            lock: Mutex::new(()),
        }
    }
}

impl StateDb for FileStateDb {
    fn store_state(&self, bytes: &[u8]) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }

    fn load_state(&self) -> anyhow::Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock();
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// `KvStore` adapter over a single JSON file holding a flat key→base64 map, backing the
/// dealer's ref-counted order store the same way `FileStateDb` backs the tree state.
pub struct FileKvStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKvStore {
    pub fn new(path: PathBuf) -> Self {
        FileKvStore {
            path,
            lock: Mutex::new(()),
        }
    }

    fn read_map(&self) -> anyhow::Result<std::collections::BTreeMap<String, Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Default::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_map(&self, map: &std::collections::BTreeMap<String, Vec<u8>>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec(map)?)?;
        Ok(())
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let _guard = self.lock.lock();
        Ok(self.read_map()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_vec());
        self.write_map(&map)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut map = self.read_map()?;
        map.remove(key);
        self.write_map(&map)
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let _guard = self.lock.lock();
        Ok(self
            .read_map()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_state_db_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let db = FileStateDb::new(dir.path().join("state.json"));
        assert_eq!(db.load_state().unwrap(), None);
        db.store_state(b"hello").unwrap();
        assert_eq!(db.load_state().unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn file_kv_store_roundtrips_and_lists_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let kv = FileKvStore::new(dir.path().join("dealer.json"));
        kv.put("order/a", b"1").unwrap();
        kv.put("order/b", b"2").unwrap();
        kv.put("other/c", b"3").unwrap();
        let mut keys = kv.keys_with_prefix("order/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["order/a".to_string(), "order/b".to_string()]);
        kv.delete("order/a").unwrap();
        assert_eq!(kv.get("order/a").unwrap(), None);
    }
}
