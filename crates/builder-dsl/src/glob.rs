// SPDX-License-Identifier: Apache-2.0
//! Deterministic glob matching over a directory tree.
//!
//! Supports `**` (any number of directory levels, including zero) and `*`
//! (any run of characters within one path segment, never crossing `/`).
//! [`glob`] always returns a sorted, duplicate-free list so two calls
//! against identical file trees produce identical results — required by
//! spec.md §8's glob-determinism invariant.

use std::path::{Path, PathBuf};

/// Walk `root` and return every regular file matching `pattern`, sorted
/// lexicographically by path with duplicates removed.
#[must_use]
pub fn glob(pattern: &str, root: &Path) -> Vec<PathBuf> {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let mut matches = Vec::new();
    walk(root, root, &pattern_segments, &mut matches);
    matches.sort();
    matches.dedup();
    matches
}

fn walk(root: &Path, dir: &Path, pattern: &[&str], out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut names: Vec<_> = entries.flatten().collect();
    names.sort_by_key(std::fs::DirEntry::file_name);

    for entry in names {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let rel_segments: Vec<&str> = relative
            .iter()
            .map(|s| s.to_str().unwrap_or(""))
            .collect();

        if file_type.is_dir() {
            walk(root, &path, pattern, out);
        } else if matches_segments(pattern, &rel_segments) {
            out.push(path);
        }
    }
}

/// Whether a path's segments match a pattern's segments, where `**` may
/// consume zero or more path segments.
fn matches_segments(pattern: &[&str], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(&"**") => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=path.len()).any(|skip| matches_segments(&pattern[1..], &path[skip..]))
        }
        Some(&seg) => match path.first() {
            Some(&first) => matches_segment(seg, first) && matches_segments(&pattern[1..], &path[1..]),
            None => false,
        },
    }
}

/// Single-segment wildcard match: `*` matches any run of characters.
fn matches_segment(pattern: &str, text: &str) -> bool {
    // Split the segment pattern on `*` and require each literal piece to
    // appear in order, consuming as little as possible (this is anchored
    // because every piece, including an empty leading/trailing one, must
    // align with the start/end of `text`).
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let mut cursor = 0usize;
    for (idx, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if idx == 0 {
            if !text[cursor..].starts_with(part) {
                return false;
            }
            cursor += part.len();
        } else if idx == parts.len() - 1 {
            return text[cursor..].ends_with(part);
        } else if let Some(found) = text[cursor..].find(part) {
            cursor += found + part.len();
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn matches_nested_extension_glob() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.rs");
        write(dir.path(), "src/nested/b.rs");
        write(dir.path(), "src/c.txt");

        let results = glob("**/*.rs", dir.path());
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|p| p.extension().unwrap() == "rs"));
    }

    #[test]
    fn results_are_sorted_and_deduped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.rs");
        write(dir.path(), "a.rs");

        let results = glob("*.rs", dir.path());
        assert_eq!(results, {
            let mut sorted = results.clone();
            sorted.sort();
            sorted
        });
    }

    #[test]
    fn two_calls_on_identical_tree_agree() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "x/y/z.rs");
        write(dir.path(), "x/w.rs");

        let first = glob("**/*.rs", dir.path());
        let second = glob("**/*.rs", dir.path());
        assert_eq!(first, second);
    }

    #[test]
    fn double_star_matches_zero_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "top.rs");

        let results = glob("**/*.rs", dir.path());
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn non_matching_extension_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt");
        let results = glob("**/*.rs", dir.path());
        assert!(results.is_empty());
    }
}
