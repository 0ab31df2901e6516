// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Storage-Order Dealer (component G): per-file state machine that places, watches, and renews
//! storage orders against an external blockchain storage market.
//!
//! Independent of `canopy-tree`/`canopy-consensus`: the dealer is keyed purely by content id and
//! never touches the directory tree directly. `canopy-node` wires a `Pin` instruction's execution
//! to `Dealer::add_order` for nodes holding a replica.

pub mod config;
mod dealer;
mod error;
mod height_tracker;
mod order;
mod order_store;
pub mod ports;

pub use dealer::Dealer;
pub use error::ChainError;
pub use height_tracker::HeightTracker;
pub use order::{OrderStatus, StorageOrder};
pub use order_store::OrderStore;
