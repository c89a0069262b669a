//! Path handling for the loader: search-path list splitting, resolving
//! embedded relative paths against the containing binary, and canonical cache
//! keys. Filesystem errors here are swallowed by design; an unresolvable path
//! simply fails to open later with a clean "not found".

use std::fs;
use std::path::{Path, PathBuf};

/// Separator for path-list configuration values.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// Split a path-list string on the platform separator, skipping empty
/// components.
#[must_use]
pub fn split_path_list(list: &str) -> Vec<PathBuf> {
    list.split(PATH_LIST_SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Resolve an embedded archive path against the binary that carries it.
///
/// Absolute candidates pass through unchanged; relative ones are joined to
/// `dirname(base_binary)` and canonicalized as far as the filesystem allows
/// (a missing final component is fine).
#[must_use]
pub fn resolve_relative(base_binary: &Path, candidate: &str) -> PathBuf {
    let candidate = Path::new(candidate);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    let base_dir = base_binary.parent().unwrap_or_else(|| Path::new(""));
    weakly_canonicalize(&base_dir.join(candidate))
}

/// Canonical form of `path` for use as a cache key; the raw path when
/// canonicalization fails.
#[must_use]
pub fn canonical_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Whether `path` names an existing regular file.
#[must_use]
pub fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}

/// Canonicalize with tolerance for a missing final component: resolve the
/// parent directory and re-append the file name.
fn weakly_canonicalize(path: &Path) -> PathBuf {
    if let Ok(resolved) = fs::canonicalize(path) {
        return resolved;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(dir) = fs::canonicalize(parent) {
            return dir.join(name);
        }
    }
    path.to_path_buf()
}
