// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Consensus-facing glue around `canopy-tree` (components C-F: Log FSM, Packer, Operator
//! Router, Pre-Committer).
//!
//! `canopy-consensus` is transport-agnostic: it depends on the consensus log and leader RPC only
//! through the [`ports`] traits, never on a concrete raft/libp2p/grpc crate. `canopy-node` wires
//! real adapters at the edges.

pub mod config;
mod error;
mod log_fsm;
mod operator;
mod packer;
mod pre_committer;
pub mod ports;

pub use error::ConsensusError;
pub use log_fsm::LogFsm;
pub use operator::{OperatorRouter, RpcConnector};
pub use packer::Packer;
pub use pre_committer::PreCommitter;
