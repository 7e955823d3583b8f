//! Path utilities for backend-relative paths
//!
//! Provider paths always use `/` as separator regardless of the local OS.
//! A trailing slash marks a directory-like entry. Lookups compare paths
//! through [`path_key`], which ignores that trailing slash.

use std::path::{Path, PathBuf};

/// Join a path and a child component using `/`.
///
/// An empty base means the container root.
pub fn join_path(base: &str, component: &str) -> String {
    let component = component.trim_start_matches('/');
    if base.is_empty() {
        component.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Final path segment (`name` of an entry)
pub fn file_name(path: &str) -> &str {
    let trimmed = strip_trailing_slash(path);
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Parent directory of a path, in directory form (with trailing slash).
///
/// Returns `""` for top-level relative paths and `"/"` for top-level
/// absolute paths.
pub fn parent_path(path: &str) -> String {
    let trimmed = strip_trailing_slash(path);
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => format!("{}/", &trimmed[..idx]),
        None => String::new(),
    }
}

/// Remove a single trailing slash, keeping a bare `/` intact
pub fn strip_trailing_slash(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

/// Directory form of a path (ensures a trailing slash)
pub fn as_directory_path(path: &str) -> String {
    if path.is_empty() || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

pub fn is_directory_path(path: &str) -> bool {
    path.ends_with('/')
}

/// Canonical lookup key: trailing slash removed, root collapsed to `""`
pub fn path_key(path: &str) -> &str {
    if path == "/" {
        ""
    } else {
        strip_trailing_slash(path)
    }
}

/// True when `path` equals `ancestor` or lies somewhere beneath it
pub fn is_same_or_descendant(path: &str, ancestor: &str) -> bool {
    let path = path_key(path);
    let ancestor = path_key(ancestor);
    if ancestor.is_empty() {
        return true;
    }
    path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'/')
}

/// Replace the final segment of a path, preserving directory form
pub fn with_file_name(path: &str, new_name: &str) -> String {
    let joined = join_path(&parent_path(path), new_name);
    if is_directory_path(path) {
        as_directory_path(&joined)
    } else {
        joined
    }
}

/// Re-root `path` from `from` to `to` (both directory prefixes)
pub fn rebase_path(path: &str, from: &str, to: &str) -> String {
    let rest = path_key(path)
        .strip_prefix(path_key(from))
        .unwrap_or("")
        .trim_start_matches('/');
    let rebased = if rest.is_empty() {
        path_key(to).to_string()
    } else {
        join_path(path_key(to), rest)
    };
    if is_directory_path(path) {
        as_directory_path(&rebased)
    } else {
        rebased
    }
}

/// Join local path components using platform-native separator.
pub fn join_local_path(base: &Path, component: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in component.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
