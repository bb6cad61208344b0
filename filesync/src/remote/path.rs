//! Remote path arithmetic. Remote paths are always `/`-separated and absolute,
//! whatever the local platform uses.

use std::path::{Component, Path};

/// Absolute, normalized form of a remote path: `.`, empty and `..` segments
/// are resolved, `..` never climbs above `/`.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Remote directory all transfers are relative to.
pub fn remote_root(server_folder: &str) -> String {
    normalize(server_folder)
}

/// Join a local relative path onto a remote directory.
pub fn join(base: &str, relative: &Path) -> String {
    let mut joined = base.trim_end_matches('/').to_string();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            joined.push('/');
            joined.push_str(&part.to_string_lossy());
        }
    }
    normalize(&joined)
}

/// Parent directory of a remote path (`/` for top-level entries).
pub fn parent(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => normalized[..idx].to_string(),
    }
}

/// Every directory from the top down to `path` itself, excluding `/`.
pub fn ancestors(path: &str) -> Vec<String> {
    let normalized = normalize(path);
    let mut current = String::new();
    let mut dirs = Vec::new();
    for part in normalized.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);
        dirs.push(current.clone());
    }
    dirs
}

/// `path` relative to `root`, `None` when it lies outside of it.
pub fn relative_to(root: &str, path: &str) -> Option<String> {
    let root = normalize(root);
    let path = normalize(path);
    if root == "/" {
        return Some(path.trim_start_matches('/').to_string());
    }
    path.strip_prefix(&root)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|rest| rest.to_string())
}
