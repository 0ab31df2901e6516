// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared wire types for the canopy replicated file-tree cluster.
//!
//! These types cross crate (and, in a real deployment, process) boundaries: they are what the
//! consensus log carries, what the HTTP front end marshals, and what the dealer persists. None of
//! them depend on a concrete block store, consensus transport, or chain client — those stay
//! behind trait ports defined in the crates that use them.

mod content_id;
mod error;
mod instruction;
mod listing;
mod peer;

pub use content_id::ContentId;
pub use error::{ClusterError, TreeError};
pub use instruction::{
    CpParams, CpSource, Instruction, InstructionBatch, InstructionCode, MkdirParams, MvParams,
    PinParams, RmParams, UnpinParams,
};
pub use listing::ListingEntry;
pub use peer::PeerId;
