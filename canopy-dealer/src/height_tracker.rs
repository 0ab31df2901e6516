// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::ports::HeightSource;

/// Caches the external chain's current height, refreshed on its own loop independent of any
/// single file's tick. Per-file tasks read the cached value rather than each polling the chain
/// themselves.
pub struct HeightTracker {
    source: Arc<dyn HeightSource>,
    cached: AtomicU64,
}

impl HeightTracker {
    pub fn new(source: Arc<dyn HeightSource>) -> Self {
        HeightTracker {
            source,
            cached: AtomicU64::new(0),
        }
    }

    pub fn current_height(&self) -> u64 {
        self.cached.load(Ordering::Acquire)
    }

    pub async fn refresh_once(&self) -> anyhow::Result<()> {
        let height = self.source.current_height().await?;
        self.cached.store(height, Ordering::Release);
        Ok(())
    }

    /// Spawns the background refresh loop; the task runs until `self` is dropped.
    pub fn spawn_refresh_loop(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Err(e) = self.refresh_once().await {
                    warn!(error = %e, "height tracker refresh failed, keeping stale cached height");
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct FixedHeight(Mutex<u64>);

    #[async_trait]
    impl HeightSource for FixedHeight {
        async fn current_height(&self) -> anyhow::Result<u64> {
            Ok(*self.0.lock())
        }
    }

    #[tokio::test]
    async fn refresh_once_updates_cache() {
        let tracker = HeightTracker::new(Arc::new(FixedHeight(Mutex::new(42))));
        assert_eq!(tracker.current_height(), 0);
        tracker.refresh_once().await.unwrap();
        assert_eq!(tracker.current_height(), 42);
    }
}
