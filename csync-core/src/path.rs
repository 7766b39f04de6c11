//! Path helpers for the content tree.
//!
//! All engine paths are absolute, `/`-separated and normalized: no trailing
//! slash except the root `/`, no empty, `.` or `..` segments.

use crate::filter::ConfigError;

/// Normalize a path: collapse duplicate separators and strip a trailing slash.
///
/// Fails if the path is not absolute or contains `.`/`..` segments.
pub fn normalize(path: &str) -> Result<String, ConfigError> {
    if !path.starts_with('/') {
        return Err(ConfigError::InvalidPath(path.to_string()));
    }
    let mut out = String::with_capacity(path.len());
    for seg in path.split('/') {
        if seg.is_empty() {
            continue;
        }
        if seg == "." || seg == ".." {
            return Err(ConfigError::InvalidPath(path.to_string()));
        }
        out.push('/');
        out.push_str(seg);
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// True if `ancestor` strictly contains `path`.
pub fn is_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor == "/" {
        return path != "/" && path.starts_with('/');
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// True if `ancestor` is `path` or strictly contains it.
pub fn is_ancestor_or_equal(ancestor: &str, path: &str) -> bool {
    ancestor == path || is_ancestor(ancestor, path)
}

/// Parent path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Final segment name; the root has no name.
pub fn name(path: &str) -> Option<&str> {
    if path == "/" {
        None
    } else {
        path.rfind('/').map(|i| &path[i + 1..])
    }
}

/// Join a child name onto a base path.
pub fn join(base: &str, child: &str) -> String {
    if base == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", base, child)
    }
}

/// Remaps paths between two mount points by swapping a prefix.
///
/// Pure and stateless: `map` replaces the `strip` prefix with `root`,
/// `map_reverse` goes the other way, and paths outside the stripped
/// subtree pass through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    strip: String,
    root: String,
}

impl PathMapping {
    /// Create a mapping from `strip` to `root`; both must be valid paths.
    pub fn new(strip: &str, root: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            strip: normalize(strip)?,
            root: normalize(root)?,
        })
    }

    /// The identity mapping.
    pub fn identity() -> Self {
        Self {
            strip: "/".to_string(),
            root: "/".to_string(),
        }
    }

    pub fn strip(&self) -> &str {
        &self.strip
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Map `path` by replacing the `strip` prefix with `root`.
    pub fn map(&self, path: &str) -> String {
        Self::rewrite(path, &self.strip, &self.root)
    }

    /// Map in the reverse direction (`root` back to `strip`).
    pub fn map_reverse(&self, path: &str) -> String {
        Self::rewrite(path, &self.root, &self.strip)
    }

    /// The mapping with both ends swapped.
    pub fn inverse(&self) -> Self {
        Self {
            strip: self.root.clone(),
            root: self.strip.clone(),
        }
    }

    fn rewrite(path: &str, from: &str, to: &str) -> String {
        if path == from {
            to.to_string()
        } else if is_ancestor(from, path) {
            let rest = if from == "/" { path } else { &path[from.len()..] };
            if to == "/" {
                rest.to_string()
            } else {
                format!("{}{}", to, rest)
            }
        } else {
            path.to_string()
        }
    }
}
