// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use std::collections::BTreeMap;

use canopy_types::{ContentId, ListingEntry, TreeError};
use serde::{Deserialize, Serialize};

use crate::path::is_prefix_of;

/// A single entry of a directory. `Dir` entries cache their own content id, recomputed whenever
/// a mutation touches them or one of their descendants: the same starting root and instruction
/// sequence must produce the same final root on every node, which requires the hash to be a pure
/// function of structure, not of mutation history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Child {
    File { content_id: ContentId, size: u64 },
    Dir(DirNode),
}

impl Child {
    pub fn content_id(&self) -> ContentId {
        match self {
            Child::File { content_id, .. } => content_id.clone(),
            Child::Dir(dir) => dir.content_id.clone(),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Child::File { size, .. } => *size,
            Child::Dir(dir) => dir.children.len() as u64,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self, Child::Dir(_))
    }
}

/// The record that gets hashed and persisted to the block store for a directory; its content id
/// is the tree root. Children are referenced by content id only, the same way a real Merkle DAG
/// directory node would reference its children, not by embedding their full subtrees, so sibling
/// directories that happen to be identical share a block.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct DirRecord {
    children: BTreeMap<String, ChildRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChildRef {
    content_id: ContentId,
    is_dir: bool,
    size: u64,
}

/// An in-memory directory node. `children` is a `BTreeMap` so iteration (and therefore hashing)
/// is always in lexicographic order, satisfying the stable-iteration-order determinism
/// requirement without a separate sort step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirNode {
    children: BTreeMap<String, Child>,
    content_id: ContentId,
}

impl Default for DirNode {
    fn default() -> Self {
        let mut dir = DirNode {
            children: BTreeMap::new(),
            content_id: ContentId::for_bytes(b""),
        };
        dir.recompute();
        dir
    }
}

impl DirNode {
    pub fn content_id(&self) -> ContentId {
        self.content_id.clone()
    }

    /// Recomputes this node's content id from its current children. Does not recurse — callers
    /// mutating a descendant are responsible for calling `recompute` at every level on the way
    /// back up, which the recursive helpers in this module always do.
    fn recompute(&mut self) {
        let record = DirRecord {
            children: self
                .children
                .iter()
                .map(|(name, child)| {
                    (
                        name.clone(),
                        ChildRef {
                            content_id: child.content_id(),
                            is_dir: child.is_dir(),
                            size: child.size(),
                        },
                    )
                })
                .collect(),
        };
        let bytes = serde_json::to_vec(&record).expect("DirRecord always serializes");
        self.content_id = ContentId::for_bytes(&bytes);
    }

    pub fn ls(&self, segments: &[&str]) -> Result<Vec<ListingEntry>, TreeError> {
        if segments.is_empty() {
            return self.list_dir(segments);
        }
        let target = self.lookup(segments)?;
        match target {
            Child::File { content_id, size } => {
                let name = segments
                    .last()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "/".to_string());
                Ok(vec![ListingEntry {
                    name,
                    size: *size,
                    is_dir: false,
                    hash: content_id.clone(),
                }])
            }
            Child::Dir(dir) => Ok(dir
                .children
                .iter()
                .map(|(name, child)| ListingEntry {
                    name: name.clone(),
                    size: child.size(),
                    is_dir: child.is_dir(),
                    hash: child.content_id(),
                })
                .collect()),
        }
    }

    fn lookup(&self, segments: &[&str]) -> Result<&Child, TreeError> {
        match segments.split_first() {
            None => Err(TreeError::ConflictingType(
                "root has no standalone listing entry".into(),
            )),
            Some((head, [])) => self
                .children
                .get(*head)
                .ok_or_else(|| TreeError::NotFound(head.to_string())),
            Some((head, rest)) => match self.children.get(*head) {
                Some(Child::Dir(dir)) => dir.lookup(rest),
                Some(Child::File { .. }) => Err(TreeError::ConflictingType(format!(
                    "{head} is a file, not a directory"
                ))),
                None => Err(TreeError::NotFound(head.to_string())),
            },
        }
    }

    /// Read-only listing of the directory itself (as opposed to [`Self::ls`], which also accepts
    /// a file path and returns its single-entry listing).
    pub fn list_dir(&self, segments: &[&str]) -> Result<Vec<ListingEntry>, TreeError> {
        let dir = self.get_dir(segments)?;
        Ok(dir
            .children
            .iter()
            .map(|(name, child)| ListingEntry {
                name: name.clone(),
                size: child.size(),
                is_dir: child.is_dir(),
                hash: child.content_id(),
            })
            .collect())
    }

    fn get_dir(&self, segments: &[&str]) -> Result<&DirNode, TreeError> {
        match segments.split_first() {
            None => Ok(self),
            Some((head, rest)) => match self.children.get(*head) {
                Some(Child::Dir(dir)) => dir.get_dir(rest),
                Some(Child::File { .. }) => Err(TreeError::ConflictingType(format!(
                    "{head} is a file, not a directory"
                ))),
                None => Err(TreeError::NotFound(head.to_string())),
            },
        }
    }

    /// Resolves `segments` to `(content_id, size, is_dir)`, used by `CP`'s path-source variant
    /// and by the `Stat` read operation for a single node reached by path.
    pub fn stat(&self, segments: &[&str]) -> Result<(ContentId, u64, bool), TreeError> {
        match segments.split_first() {
            None => Ok((self.content_id.clone(), self.children.len() as u64, true)),
            Some((head, rest)) => match self.children.get(*head) {
                Some(Child::Dir(dir)) if rest.is_empty() => {
                    Ok((dir.content_id.clone(), dir.children.len() as u64, true))
                }
                Some(Child::Dir(dir)) => dir.stat(rest),
                Some(Child::File { content_id, size }) if rest.is_empty() => {
                    Ok((content_id.clone(), *size, false))
                }
                Some(Child::File { .. }) => Err(TreeError::ConflictingType(format!(
                    "{head} is a file, not a directory"
                ))),
                None => Err(TreeError::NotFound(head.to_string())),
            },
        }
    }

    /// Recursively verifies that every file referenced by this subtree is actually present in
    /// `store`, rather than returning as soon as the first level is confirmed resident.
    pub fn ensure_stored(&self, store: &dyn crate::ports::BlockStore) -> anyhow::Result<()> {
        for child in self.children.values() {
            match child {
                Child::File { content_id, .. } => {
                    store.get(content_id)?;
                }
                Child::Dir(dir) => dir.ensure_stored(store)?,
            }
        }
        Ok(())
    }

    fn get_dir_mut(&mut self, segments: &[&str]) -> Result<&mut DirNode, TreeError> {
        match segments.split_first() {
            None => Ok(self),
            Some((head, rest)) => match self.children.get_mut(*head) {
                Some(Child::Dir(dir)) => dir.get_dir_mut(rest),
                Some(Child::File { .. }) => Err(TreeError::ConflictingType(format!(
                    "{head} is a file, not a directory"
                ))),
                None => Err(TreeError::NotFound(head.to_string())),
            },
        }
    }

    /// `CP(dest_path, ...)`: the destination's parent must already exist. A destination parent
    /// is never created implicitly; callers create it explicitly via `MKDIR` first.
    pub fn put_file(
        &mut self,
        dest: &[&str],
        content_id: ContentId,
        size: u64,
    ) -> Result<(), TreeError> {
        let (name, parent_segs) = dest
            .split_last()
            .ok_or_else(|| TreeError::BadPath("cannot cp to the root".into()))?;
        let parent = self.get_dir_mut(parent_segs)?;
        parent
            .children
            .insert((*name).to_string(), Child::File { content_id, size });
        self.recompute_path(dest);
        Ok(())
    }

    /// `MKDIR(path)`: creates `path` and all missing ancestors, idempotent on an existing
    /// directory.
    pub fn mkdir(&mut self, segments: &[&str]) -> Result<(), TreeError> {
        self.mkdir_inner(segments)?;
        self.recompute_path(segments);
        Ok(())
    }

    fn mkdir_inner(&mut self, segments: &[&str]) -> Result<(), TreeError> {
        let Some((head, rest)) = segments.split_first() else {
            return Ok(());
        };
        let entry = self
            .children
            .entry((*head).to_string())
            .or_insert_with(|| Child::Dir(DirNode::default()));
        match entry {
            Child::Dir(dir) => dir.mkdir_inner(rest),
            Child::File { .. } => Err(TreeError::ConflictingType(format!(
                "{head} exists and is not a directory"
            ))),
        }
    }

    /// `RM(path)`: unlink, silently succeeding if the target is already absent.
    pub fn rm(&mut self, segments: &[&str]) -> Result<(), TreeError> {
        let Some((name, parent_segs)) = segments.split_last() else {
            return Err(TreeError::BadPath("cannot rm the root".into()));
        };
        let parent = match self.get_dir_mut(parent_segs) {
            Ok(p) => p,
            Err(TreeError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        parent.children.remove(*name);
        self.recompute_path(parent_segs);
        Ok(())
    }

    /// `MV(src, dst)`. If `dst` names an existing directory, `src` is placed inside it under its
    /// own basename; otherwise `dst` is the new full name, whose parent must already exist.
    pub fn mv(&mut self, src: &[&str], dst: &[&str]) -> Result<(), TreeError> {
        if is_prefix_of(src, dst) {
            return Err(TreeError::ConflictingType(
                "cannot move a directory into its own subtree".into(),
            ));
        }
        let (src_name, src_parent_segs) = src
            .split_last()
            .ok_or_else(|| TreeError::BadPath("cannot mv the root".into()))?;
        let moved = {
            let src_parent = self.get_dir_mut(src_parent_segs)?;
            src_parent
                .children
                .remove(*src_name)
                .ok_or_else(|| TreeError::NotFound(src.join("/")))?
        };

        let dst_is_dir = self.get_dir(dst).is_ok();
        let final_dst: Vec<&str> = if dst_is_dir {
            let mut v = dst.to_vec();
            v.push(src_name);
            v
        } else {
            dst.to_vec()
        };
        let (dst_name, dst_parent_segs) = final_dst
            .split_last()
            .ok_or_else(|| TreeError::BadPath("cannot mv to the root".into()))?;
        let dst_parent = match self.get_dir_mut(dst_parent_segs) {
            Ok(p) => p,
            Err(e) => {
                // put back the source so a failed move is a no-op.
                let src_parent = self
                    .get_dir_mut(src_parent_segs)
                    .expect("src parent existed moments ago");
                src_parent.children.insert((*src_name).to_string(), moved);
                self.recompute_path(src_parent_segs);
                return Err(e);
            }
        };
        dst_parent
            .children
            .insert((*dst_name).to_string(), moved);
        self.recompute_path(&final_dst);
        self.recompute_path(src_parent_segs);
        Ok(())
    }

    /// Recomputes content ids from the deepest touched ancestor back up to `self`.
    fn recompute_path(&mut self, segments: &[&str]) {
        if let Some((head, rest)) = segments.split_first() {
            if let Some(Child::Dir(dir)) = self.children.get_mut(*head) {
                dir.recompute_path(rest);
            }
        }
        self.recompute();
    }
}
