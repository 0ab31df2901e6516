// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use canopy_types::ContentId;
use serde::{Deserialize, Serialize};

use crate::ports::KvStore;

const PREFIX: &str = "dealer/order/";

#[derive(Serialize, Deserialize)]
struct RefCount {
    count: u32,
}

/// Per-cid reference count, persisted so a restart can resume tracking every file still owned
/// by at least one pin.
pub struct OrderStore {
    kv: Arc<dyn KvStore>,
}

impl OrderStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        OrderStore { kv }
    }

    fn key(content_id: &ContentId) -> String {
        format!("{PREFIX}{}", content_id.as_str())
    }

    /// Increments the reference count for `content_id`, creating it at 1 if unseen. Returns the
    /// count after the increment.
    pub fn add_order(&self, content_id: &ContentId) -> anyhow::Result<u32> {
        let key = Self::key(content_id);
        let count = self.read_count(&key)?.unwrap_or(0) + 1;
        self.kv.put(&key, &serde_json::to_vec(&RefCount { count })?)?;
        Ok(count)
    }

    /// Decrements the reference count, removing the entry once it reaches zero. Returns the
    /// count after the decrement (`0` means the caller should tell the per-file task to
    /// DISCARD).
    pub fn delete_cid(&self, content_id: &ContentId) -> anyhow::Result<u32> {
        let key = Self::key(content_id);
        let count = self.read_count(&key)?.unwrap_or(0).saturating_sub(1);
        if count == 0 {
            self.kv.delete(&key)?;
        } else {
            self.kv.put(&key, &serde_json::to_vec(&RefCount { count })?)?;
        }
        Ok(count)
    }

    pub fn list(&self) -> anyhow::Result<Vec<ContentId>> {
        Ok(self
            .kv
            .keys_with_prefix(PREFIX)?
            .into_iter()
            .map(|k| ContentId::from(k.trim_start_matches(PREFIX).to_string()))
            .collect())
    }

    fn read_count(&self, key: &str) -> anyhow::Result<Option<u32>> {
        match self.kv.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice::<RefCount>(&bytes)?.count)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::InMemoryKvStore;

    #[test]
    fn add_and_delete_track_reference_counts() {
        let store = OrderStore::new(Arc::new(InMemoryKvStore::default()));
        let cid = ContentId::for_bytes(b"x");

        assert_eq!(store.add_order(&cid).unwrap(), 1);
        assert_eq!(store.add_order(&cid).unwrap(), 2);
        assert_eq!(store.list().unwrap(), vec![cid.clone()]);

        assert_eq!(store.delete_cid(&cid).unwrap(), 1);
        assert_eq!(store.list().unwrap(), vec![cid.clone()]);

        assert_eq!(store.delete_cid(&cid).unwrap(), 0);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn delete_below_zero_stays_at_zero() {
        let store = OrderStore::new(Arc::new(InMemoryKvStore::default()));
        let cid = ContentId::for_bytes(b"y");
        assert_eq!(store.delete_cid(&cid).unwrap(), 0);
    }
}
