// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::content_id::ContentId;

/// One entry of a directory listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub hash: ContentId,
}
