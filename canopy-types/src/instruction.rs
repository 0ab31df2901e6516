// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::content_id::ContentId;
use crate::peer::PeerId;

/// Tag of an [`Instruction`], kept as its own type so the wire encoding — a length-prefixed
/// tagged record `{code: varint, ...}` — has a stable discriminant independent of the variant's
/// field layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum InstructionCode {
    Cp = 0,
    Mv = 1,
    Rm = 2,
    Mkdir = 3,
    Pin = 4,
    Unpin = 5,
}

/// Where `CP`'s content comes from: an existing tree path (copy-by-reference) or a fresh block
/// whose bytes accompany the instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpSource {
    /// An absolute path already present in the tree.
    Path(String),
    /// A content id together with the raw bytes that must hash to it.
    Block {
        content_id: ContentId,
        block_bytes: Vec<u8>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpParams {
    pub dest_path: String,
    pub source: CpSource,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvParams {
    pub src_path: String,
    pub dst_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmParams {
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MkdirParams {
    pub path: String,
}

/// `dest_path` is an optional pin-then-copy convenience: when present, the pinned content is
/// also materialized at that tree path in the same instruction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinParams {
    pub content_id: ContentId,
    pub replica_peers: Vec<PeerId>,
    pub dest_path: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpinParams {
    pub content_id: ContentId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum Instruction {
    Cp(CpParams),
    Mv(MvParams),
    Rm(RmParams),
    Mkdir(MkdirParams),
    Pin(PinParams),
    Unpin(UnpinParams),
}

impl Instruction {
    pub fn code(&self) -> InstructionCode {
        match self {
            Instruction::Cp(_) => InstructionCode::Cp,
            Instruction::Mv(_) => InstructionCode::Mv,
            Instruction::Rm(_) => InstructionCode::Rm,
            Instruction::Mkdir(_) => InstructionCode::Mkdir,
            Instruction::Pin(_) => InstructionCode::Pin,
            Instruction::Unpin(_) => InstructionCode::Unpin,
        }
    }
}

/// A group of instructions committed together; `pre_root` and `post_root` are what followers use
/// to detect divergence against their own re-execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionBatch {
    pub instructions: Vec<Instruction>,
    pub pre_root: ContentId,
    pub post_root: ContentId,
}
