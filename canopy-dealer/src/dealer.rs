// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Storage-Order Dealer (component G): a per-file state machine that places, watches, and
//! renews external storage orders. Runs on every node but only its replica holders ever see
//! anything but `CidNotFound` from the chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use canopy_types::ContentId;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::DealerConfig;
use crate::error::ChainError;
use crate::height_tracker::HeightTracker;
use crate::order::{OrderStatus, StorageOrder};
use crate::order_store::OrderStore;
use crate::ports::ChainClient;

pub struct Dealer {
    chain: Arc<dyn ChainClient>,
    height_tracker: Arc<HeightTracker>,
    store: OrderStore,
    config: DealerConfig,
    orders: Mutex<HashMap<ContentId, StorageOrder>>,
    handles: Mutex<HashMap<ContentId, JoinHandle<()>>>,
}

impl Dealer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        height_tracker: Arc<HeightTracker>,
        store: OrderStore,
        config: DealerConfig,
    ) -> Arc<Self> {
        Arc::new(Dealer {
            chain,
            height_tracker,
            store,
            config,
            orders: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Replays the persisted reference-counted store into running per-file tasks, to resume
    /// tracking after a restart. File sizes are not part of the persisted record, so a resumed
    /// order starts with `file_size: 0`; `get_file_info`/`place_storage_order` calls treat that
    /// as "already known to the chain, size irrelevant to re-placement".
    pub fn resume(self: &Arc<Self>) -> anyhow::Result<()> {
        for content_id in self.store.list()? {
            self.spawn_watcher(content_id, 0);
        }
        Ok(())
    }

    /// Registers interest in `content_id`, requesting an external storage order be placed and
    /// kept renewed for it. Idempotent: a second `add_order` for an already-tracked cid only
    /// bumps the store's reference count.
    pub fn add_order(self: &Arc<Self>, content_id: ContentId, file_size: u64) -> anyhow::Result<()> {
        self.store.add_order(&content_id)?;
        let mut orders = self.orders.lock();
        if !orders.contains_key(&content_id) {
            orders.insert(content_id.clone(), StorageOrder::new(content_id.clone(), file_size));
            drop(orders);
            self.spawn_watcher(content_id, file_size);
        }
        Ok(())
    }

    /// Decrements the content id's reference count; once it reaches zero the owning watcher task
    /// transitions to DISCARD and exits on its next tick.
    pub fn delete_cid(&self, content_id: &ContentId) -> anyhow::Result<()> {
        let remaining = self.store.delete_cid(content_id)?;
        if remaining == 0 {
            if let Some(order) = self.orders.lock().get_mut(content_id) {
                order.status = OrderStatus::Discard;
            }
        }
        Ok(())
    }

    pub fn status(&self, content_id: &ContentId) -> Option<StorageOrder> {
        self.orders.lock().get(content_id).cloned()
    }

    fn spawn_watcher(self: &Arc<Self>, content_id: ContentId, file_size: u64) {
        self.orders
            .lock()
            .entry(content_id.clone())
            .or_insert_with(|| StorageOrder::new(content_id.clone(), file_size));
        let dealer = Arc::clone(self);
        let key = content_id.clone();
        let handle = tokio::spawn(async move { dealer.watch(content_id).await });
        self.handles.lock().insert(key, handle);
    }

    async fn watch(self: Arc<Self>, content_id: ContentId) {
        loop {
            let status_before = self
                .orders
                .lock()
                .get(&content_id)
                .map(|o| o.status)
                .unwrap_or(OrderStatus::Discard);
            if matches!(status_before, OrderStatus::Discard) {
                debug!(cid = %content_id, "dealer watcher exiting, order discarded");
                self.handles.lock().remove(&content_id);
                return;
            }
            if !matches!(status_before, OrderStatus::Error) {
                self.tick(&content_id).await;
            }
            tokio::time::sleep(Duration::from_millis(self.config.tick_interval_ms)).await;
        }
    }

    async fn tick(&self, content_id: &ContentId) {
        let current_height = self.height_tracker.current_height();
        let status = match self.orders.lock().get(content_id) {
            Some(o) => o.status,
            None => return,
        };

        match status {
            OrderStatus::Start => self.tick_start(content_id, current_height).await,
            OrderStatus::Waiting => self.tick_waiting(content_id, current_height).await,
            OrderStatus::Accepted => self.tick_accepted(content_id, current_height).await,
            OrderStatus::Renew | OrderStatus::Retry => self.tick_renew_or_retry(content_id, current_height).await,
            OrderStatus::Error | OrderStatus::Discard => {}
        }
    }

    async fn tick_start(&self, content_id: &ContentId, current_height: u64) {
        match self.chain.get_file_info(content_id).await {
            Ok(info) if info.expired_on > current_height => {
                self.with_order(content_id, |o| o.enter_accepted(info));
            }
            Ok(info) if info.expired_on == 0 => {
                self.with_order(content_id, |o| o.enter_waiting(current_height, info));
            }
            Ok(info) => {
                // expired_on is nonzero but not ahead of current_height: already lapsed, must
                // renew immediately rather than waiting.
                self.with_order(content_id, |o| {
                    o.remote_file_info = Some(info);
                    o.status = OrderStatus::Renew;
                });
            }
            Err(ChainError::CidNotFound(_)) => {
                self.place_or_retry(content_id, current_height).await;
            }
            Err(ChainError::Transient(e)) => {
                self.with_order(content_id, |o| o.bump_retry(self.config.retry_bound, e));
            }
        }
    }

    async fn tick_waiting(&self, content_id: &ContentId, current_height: u64) {
        let waiting_height = self
            .orders
            .lock()
            .get(content_id)
            .and_then(|o| o.height_observed)
            .unwrap_or(current_height);

        match self.chain.get_file_info(content_id).await {
            // `expired_on == 0` means the market hasn't calculated a lease yet, the same
            // sentinel START uses; only a real calculation can move the state on from WAITING.
            Ok(info) if info.expired_on > 0 && info.calculated_at >= waiting_height => {
                if info.expired_on.saturating_sub(current_height) < self.config.renew_threshold_blocks {
                    self.with_order(content_id, |o| {
                        o.remote_file_info = Some(info);
                        o.status = OrderStatus::Renew;
                    });
                } else {
                    self.with_order(content_id, |o| o.enter_accepted(info));
                }
            }
            Ok(info) => {
                self.with_order(content_id, |o| o.remote_file_info = Some(info));
            }
            Err(ChainError::CidNotFound(_)) => {
                warn!(cid = %content_id, "cid not found while WAITING, a fatal invariant violation");
                self.with_order(content_id, |o| {
                    o.status = OrderStatus::Error;
                    o.last_error = Some("cid not found while WAITING".to_string());
                });
            }
            Err(ChainError::Transient(e)) => {
                self.with_order(content_id, |o| o.last_error = Some(e.to_string()));
            }
        }
    }

    async fn tick_accepted(&self, content_id: &ContentId, current_height: u64) {
        match self.chain.get_file_info(content_id).await {
            Ok(info) => {
                let renew = info.expired_on.saturating_sub(current_height) < self.config.renew_threshold_blocks;
                self.with_order(content_id, |o| {
                    o.remote_file_info = Some(info);
                    if renew {
                        o.status = OrderStatus::Renew;
                    }
                });
            }
            Err(e) => {
                self.with_order(content_id, |o| o.last_error = Some(e.to_string()));
            }
        }
    }

    async fn tick_renew_or_retry(&self, content_id: &ContentId, current_height: u64) {
        self.place_or_retry(content_id, current_height).await;
    }

    async fn place_or_retry(&self, content_id: &ContentId, current_height: u64) {
        let file_size = self
            .orders
            .lock()
            .get(content_id)
            .map(|o| o.file_size)
            .unwrap_or(0);
        let outcome = tokio::time::timeout(
            Duration::from_millis(self.config.extrinsic_watch_timeout_ms),
            self.chain.place_storage_order(content_id, file_size),
        )
        .await;
        match outcome {
            Ok(Ok(())) => {
                self.with_order(content_id, |o| {
                    o.status = OrderStatus::Waiting;
                    o.height_observed = Some(current_height);
                    o.retry_count = 0;
                });
            }
            Ok(Err(e)) => {
                self.with_order(content_id, |o| o.bump_retry(self.config.retry_bound, e));
            }
            Err(_elapsed) => {
                self.with_order(content_id, |o| {
                    o.bump_retry(self.config.retry_bound, "place_storage_order timed out")
                });
            }
        }
    }

    fn with_order(&self, content_id: &ContentId, f: impl FnOnce(&mut StorageOrder)) {
        if let Some(order) = self.orders.lock().get_mut(content_id) {
            f(order);
        }
    }

    /// Test seam: registers an order the same way `add_order` does, minus spawning the
    /// background watcher task, so tests can drive `tick` deterministically instead of racing a
    /// real 10s-interval loop.
    #[cfg(test)]
    fn register_without_watcher(&self, content_id: ContentId, file_size: u64) -> anyhow::Result<()> {
        self.store.add_order(&content_id)?;
        self.orders
            .lock()
            .entry(content_id.clone())
            .or_insert_with(|| StorageOrder::new(content_id, file_size));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FileInfo, HeightSource, InMemoryChainClient, InMemoryKvStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FixedHeight(AtomicU64);

    #[async_trait]
    impl HeightSource for FixedHeight {
        async fn current_height(&self) -> anyhow::Result<u64> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    fn new_dealer(height: u64) -> (Arc<Dealer>, Arc<InMemoryChainClient>) {
        let chain = Arc::new(InMemoryChainClient::default());
        let height_tracker = Arc::new(HeightTracker::new(Arc::new(FixedHeight(AtomicU64::new(height)))));
        let dealer = Dealer::new(
            chain.clone(),
            height_tracker,
            OrderStore::new(Arc::new(InMemoryKvStore::default())),
            DealerConfig::default(),
        );
        (dealer, chain)
    }

    /// `add_order` against a chain that starts out `CidNotFound` places one order; the next
    /// tick's still-uncalculated reply keeps it WAITING; once the market reports a lease
    /// comfortably past the renew threshold it reaches ACCEPTED with a reset retry count.
    #[tokio::test]
    async fn lifecycle_from_start_through_accepted() {
        let (dealer, chain) = new_dealer(0);
        let cid = ContentId::for_bytes(b"file");
        dealer.register_without_watcher(cid.clone(), 128).unwrap();

        dealer.tick(&cid).await;
        assert_eq!(dealer.status(&cid).unwrap().status, OrderStatus::Waiting);

        dealer.tick(&cid).await;
        assert_eq!(dealer.status(&cid).unwrap().status, OrderStatus::Waiting);

        chain.seed(
            &cid,
            FileInfo {
                expired_on: 1_000,
                calculated_at: 1,
            },
        );
        dealer.tick(&cid).await;
        let order = dealer.status(&cid).unwrap();
        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.retry_count, 0);
    }

    #[tokio::test]
    async fn start_enters_accepted_directly_when_already_covered() {
        let (dealer, chain) = new_dealer(10);
        let cid = ContentId::for_bytes(b"already-placed");
        chain.seed(
            &cid,
            FileInfo {
                expired_on: 500,
                calculated_at: 1,
            },
        );
        dealer.register_without_watcher(cid.clone(), 64).unwrap();
        dealer.tick(&cid).await;
        assert_eq!(dealer.status(&cid).unwrap().status, OrderStatus::Accepted);
    }

    #[tokio::test]
    async fn three_consecutive_transient_failures_moves_to_error() {
        struct AlwaysTransient;
        #[async_trait]
        impl ChainClient for AlwaysTransient {
            async fn place_storage_order(&self, _cid: &ContentId, _size: u64) -> anyhow::Result<()> {
                Ok(())
            }
            async fn get_file_info(&self, _cid: &ContentId) -> Result<FileInfo, ChainError> {
                Err(ChainError::Transient(anyhow::anyhow!("rpc timeout")))
            }
        }

        let height_tracker = Arc::new(HeightTracker::new(Arc::new(FixedHeight(AtomicU64::new(0)))));
        let dealer = Dealer::new(
            Arc::new(AlwaysTransient),
            height_tracker,
            OrderStore::new(Arc::new(InMemoryKvStore::default())),
            DealerConfig::default(),
        );
        let cid = ContentId::for_bytes(b"flaky");
        dealer.register_without_watcher(cid.clone(), 1).unwrap();

        for _ in 0..3 {
            dealer.tick(&cid).await;
        }
        assert_eq!(dealer.status(&cid).unwrap().status, OrderStatus::Error);
    }

    #[tokio::test]
    async fn delete_cid_discards_once_ref_count_reaches_zero() {
        let (dealer, chain) = new_dealer(0);
        let cid = ContentId::for_bytes(b"shared");
        dealer.register_without_watcher(cid.clone(), 1).unwrap();
        dealer.register_without_watcher(cid.clone(), 1).unwrap();

        dealer.delete_cid(&cid).unwrap();
        assert_ne!(dealer.status(&cid).unwrap().status, OrderStatus::Discard);

        dealer.delete_cid(&cid).unwrap();
        assert_eq!(dealer.status(&cid).unwrap().status, OrderStatus::Discard);
        let _ = chain;
    }
}
