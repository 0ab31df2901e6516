// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Tunables for the [`crate::packer::Packer`] flush loop, mirroring the
/// `#[serde(default)]` + explicit `Default` impl convention used throughout the teacher's
/// `config/src/config/*.rs` family.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct PackerConfig {
    /// Time window since the first buffered instruction before a flush is forced.
    pub flush_interval_ms: u64,
    /// Item-count threshold that forces a flush regardless of the time window.
    pub flush_max_items: usize,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 300,
            flush_max_items: 100,
        }
    }
}

/// Tunables for the [`crate::pre_committer::PreCommitter`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct PreCommitConfig {
    /// How long the Pre-Committer waits for the consensus append future before giving up and
    /// reporting a timeout to every waiting caller.
    pub consensus_timeout_ms: u64,
}

impl Default for PreCommitConfig {
    fn default() -> Self {
        Self {
            consensus_timeout_ms: 5_000,
        }
    }
}

/// Tunables for the [`crate::operator::OperatorRouter`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct OperatorRouterConfig {
    /// Backoff between leader-view polls when no leader is currently visible.
    pub leader_poll_backoff_ms: u64,
}

impl Default for OperatorRouterConfig {
    fn default() -> Self {
        Self {
            leader_poll_backoff_ms: 20,
        }
    }
}
