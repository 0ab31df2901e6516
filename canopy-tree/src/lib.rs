// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Merkle directory-tree state machine, pin tracker, and replica selector.
//!
//! [`TreeState`] is the replicated state machine: every node in the cluster holds one, and
//! applies the same committed instruction batches to it in the same order, so that
//! [`TreeState::root_id`] converges across replicas. [`select_replicas`] is the pure function
//! the leader uses when choosing which peers a new `Pin` should target.

mod dir;
mod path;
mod ports;
mod tree;

pub use ports::{BlockStore, InMemoryBlockStore, InMemoryStateDb, StateDb};
pub use tree::{select_replicas, ExclusiveSection, PinRecord, Snapshot, TreeState};
