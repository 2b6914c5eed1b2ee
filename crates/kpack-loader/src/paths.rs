//! Search-path resolution.

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolve one marker path against the host binary's location. Absolute
/// paths pass through untouched; relative paths are joined onto the
/// binary's parent directory and normalized lexically.
pub fn resolve_marker_path(binary_path: &Path, marker_path: &str) -> PathBuf {
    let rel = Path::new(marker_path);
    if rel.is_absolute() {
        return rel.to_path_buf();
    }

    let base = binary_path.parent().unwrap_or_else(|| Path::new(""));
    normalize(&base.join(rel))
}

/// Lexical normalization: drop `.` components, let `..` pop the previous
/// normal component. `..` at a root stays at the root; `..` past the start
/// of a relative path is kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(Component::ParentDir),
            },
            other => out.push(other),
        }
    }
    out
}

/// The key under which an archive is memoized. Canonicalization failures
/// (most commonly a nonexistent path) fall back to the path as given; the
/// caller will fail to open it, which is acceptable.
pub fn canonical_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
