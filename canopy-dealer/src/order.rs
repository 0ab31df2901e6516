// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use canopy_types::ContentId;
use serde::{Deserialize, Serialize};

use crate::ports::FileInfo;

/// Order status: `START → WAITING → ACCEPTED → RENEW → (RETRY → …) → ERROR | DISCARD`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Start,
    Waiting,
    Accepted,
    Renew,
    Retry,
    Error,
    Discard,
}

/// Per-content storage-order record. `height_observed` doubles as `WAITING.waiting_height`: the
/// height at which the current wait began.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageOrder {
    pub content_id: ContentId,
    pub file_size: u64,
    pub height_observed: Option<u64>,
    pub remote_file_info: Option<FileInfo>,
    pub status: OrderStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl StorageOrder {
    pub fn new(content_id: ContentId, file_size: u64) -> Self {
        StorageOrder {
            content_id,
            file_size,
            height_observed: None,
            remote_file_info: None,
            status: OrderStatus::Start,
            retry_count: 0,
            last_error: None,
        }
    }

    /// `retry_count` resets on entry to ACCEPTED.
    pub fn enter_accepted(&mut self, info: FileInfo) {
        self.status = OrderStatus::Accepted;
        self.retry_count = 0;
        self.last_error = None;
        self.remote_file_info = Some(info);
    }

    pub fn enter_waiting(&mut self, current_height: u64, info: FileInfo) {
        self.status = OrderStatus::Waiting;
        self.height_observed = Some(current_height);
        self.remote_file_info = Some(info);
    }

    pub fn bump_retry(&mut self, retry_bound: u32, error: impl ToString) {
        self.retry_count += 1;
        self.last_error = Some(error.to_string());
        self.status = if self.retry_count >= retry_bound {
            OrderStatus::Error
        } else {
            OrderStatus::Retry
        };
    }
}
