// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use canopy_types::ContentId;
use thiserror::Error;

/// What `ChainClient::get_file_info`/`place_storage_order` can fail with. Kept distinct from
/// `canopy_types::ClusterError` since the per-file state machine branches differently on
/// "not found" versus every other failure.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("content id not found on chain: {0}")]
    CidNotFound(ContentId),
    #[error("transient chain error: {0}")]
    Transient(#[source] anyhow::Error),
}
