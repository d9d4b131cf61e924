//! Registry path helpers.
//!
//! Paths are absolute, slash-separated and never end with a slash
//! (except the root `/`). Empty segments are rejected.

use crate::registry::error::{RegistryError, RegistryResult};

/// The root path.
pub const ROOT: &str = "/";

/// Validate a node path. The root is accepted only when `allow_root` is set.
pub fn validate(path: &str, allow_root: bool) -> RegistryResult<()> {
    let invalid = |reason: &'static str| RegistryError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if !path.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if path == ROOT {
        return if allow_root {
            Ok(())
        } else {
            Err(invalid("root is not a node"))
        };
    }
    if path.ends_with('/') {
        return Err(invalid("must not end with '/'"));
    }
    if path.contains("//") {
        return Err(invalid("empty path segment"));
    }
    Ok(())
}

/// Returns true if `path` is `root` itself or lies beneath it.
pub fn is_within(path: &str, root: &str) -> bool {
    if root == ROOT {
        return path.starts_with('/');
    }
    path == root
        || (path.len() > root.len() && path.starts_with(root) && path.as_bytes()[root.len()] == b'/')
}

/// Parent of a non-root path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// All strict ancestors of `path`, outermost first, excluding the root.
pub fn ancestors(path: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut current = parent(path);
    while let Some(p) = current {
        if p == ROOT {
            break;
        }
        result.push(p);
        current = parent(p);
    }
    result.reverse();
    result
}

/// Join a base path and a child segment.
pub fn join(base: &str, segment: &str) -> String {
    if base == ROOT {
        format!("/{}", segment)
    } else {
        format!("{}/{}", base, segment)
    }
}

/// The immediate child segment of `root` that `path` lies under.
pub fn child_segment<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    if !is_within(path, root) || path == root {
        return None;
    }
    let rest = if root == ROOT {
        &path[1..]
    } else {
        &path[root.len() + 1..]
    };
    rest.split('/').next().filter(|s| !s.is_empty())
}
