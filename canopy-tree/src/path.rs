// Copyright (c) The Libra Core Contributors
// SPDX-License-Identifier: Apache-2.0
use canopy_types::TreeError;

/// Validates and splits an absolute path into its segments, rejecting empty paths, relative
/// paths, and `.`/`..` components. Mirrors `consensus/state/state.go::checkPath` plus the
/// `gopath.Clean` call it relies on, made explicit rather than delegated to a path library.
pub fn split_absolute(path: &str) -> Result<Vec<&str>, TreeError> {
    if path.is_empty() {
        return Err(TreeError::BadPath("paths must not be empty".into()));
    }
    if !path.starts_with('/') {
        return Err(TreeError::BadPath(
            "paths must start with a leading slash".into(),
        ));
    }
    let mut segments = Vec::new();
    for part in path.split('/') {
        match part {
            "" => continue,
            "." => continue,
            ".." => {
                return Err(TreeError::BadPath(format!(
                    "path must not contain '..': {path}"
                )))
            }
            seg => segments.push(seg),
        }
    }
    Ok(segments)
}

/// `true` if `ancestor` is a prefix of `path` (or equal to it) at segment granularity, used to
/// reject moving a directory into its own subtree.
pub fn is_prefix_of(ancestor: &[&str], path: &[&str]) -> bool {
    ancestor.len() <= path.len() && ancestor.iter().zip(path.iter()).all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_paths() {
        assert!(split_absolute("a/b").is_err());
    }

    #[test]
    fn rejects_dotdot() {
        assert!(split_absolute("/a/../b").is_err());
    }

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(split_absolute("/a//b/").unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn root_is_empty_segments() {
        assert_eq!(split_absolute("/").unwrap(), Vec::<&str>::new());
    }

    #[test]
    fn prefix_detection() {
        assert!(is_prefix_of(&["a"], &["a", "b"]));
        assert!(!is_prefix_of(&["a", "b"], &["a"]));
        assert!(is_prefix_of(&["a"], &["a"]));
    }
}
