// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use crate::content_id::ContentId;

/// Validation and domain error kinds. These are the errors that can be attributed to a single
/// instruction and returned to a caller without ambiguity; transient and invariant-violation
/// errors are represented separately (see `canopy-consensus::ConsensusError::Inconsistent` and
/// the `anyhow::Error` ports use for I/O-shaped failures).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("unrecognized instruction code")]
    UnknownCode,
    #[error("bad parameters: {0}")]
    BadParams(String),
    #[error("bad path: {0}")]
    BadPath(String),
    #[error("block bytes do not hash to the supplied content id {0}")]
    BadBlock(ContentId),
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("conflicting type at path: {0}")]
    ConflictingType(String),
    /// Wraps an unexpected port failure (block store put/get) encountered mid-execution, where
    /// the original's Go code would have returned the raw `error` from `CoreApi.Unixfs().Add`.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Domain errors surfaced by the replica selector and the storage-order dealer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("requested {requested} replicas but only {available} peers are known")]
    InsufficientNodes { requested: usize, available: usize },
    #[error("content id not found on chain: {0}")]
    CidNotFound(ContentId),
}
