// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Tuning knobs for the dealer: tick interval default 10 s, height tracker refresh every 5 s.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DealerConfig {
    pub tick_interval_ms: u64,
    pub height_refresh_ms: u64,
    /// Three consecutive `place_storage_order` failures move a file to ERROR.
    pub retry_bound: u32,
    /// Blocks of remaining lease life below which an ACCEPTED/WAITING order is renewed. Not
    /// named numerically anywhere upstream; chosen here as an explicit default, recorded as an
    /// open question in DESIGN.md.
    pub renew_threshold_blocks: u64,
    /// Bounds the extrinsic-submission watcher per `place_storage_order` call; a call that
    /// outruns this is treated as a failure for retry purposes.
    pub extrinsic_watch_timeout_ms: u64,
}

impl Default for DealerConfig {
    fn default() -> Self {
        DealerConfig {
            tick_interval_ms: 10_000,
            height_refresh_ms: 5_000,
            retry_bound: 3,
            renew_threshold_blocks: 100,
            extrinsic_watch_timeout_ms: 60_000,
        }
    }
}
