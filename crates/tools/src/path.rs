//! Workspace scoping for file-system tools.
//!
//! Every path a tool receives is interpreted relative to the workspace root
//! and must stay inside it, after `..` components and symlinks are resolved.

use std::path::{Component, Path, PathBuf};

/// Error returned when a requested path cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum PathScopeError {
    #[error("Path '{path}' is outside the workspace")]
    OutsideWorkspace { path: String },

    #[error("Failed to resolve path '{path}': {reason}")]
    ResolveFailed { path: String, reason: String },
}

/// Resolve `requested` against `workspace`, refusing anything that escapes it.
///
/// Absolute paths are accepted only when they already point inside the
/// workspace. The returned path is canonical when the target exists.
pub fn resolve_in_workspace(workspace: &Path, requested: &str) -> Result<PathBuf, PathScopeError> {
    let root = workspace
        .canonicalize()
        .map_err(|e| PathScopeError::ResolveFailed {
            path: workspace.display().to_string(),
            reason: e.to_string(),
        })?;

    let requested_path = Path::new(requested);
    let joined = if requested_path.is_absolute() {
        requested_path.to_path_buf()
    } else {
        root.join(requested_path)
    };

    let normalized = normalize(&joined);
    if !normalized.starts_with(&root) {
        return Err(PathScopeError::OutsideWorkspace {
            path: requested.into(),
        });
    }

    // Symlinks inside the workspace may still point out of it
    if normalized.exists() {
        let canonical = normalized
            .canonicalize()
            .map_err(|e| PathScopeError::ResolveFailed {
                path: requested.into(),
                reason: e.to_string(),
            })?;
        if !canonical.starts_with(&root) {
            return Err(PathScopeError::OutsideWorkspace {
                path: requested.into(),
            });
        }
        return Ok(canonical);
    }

    Ok(normalized)
}

/// Path relative to the workspace root, for display in tool output.
pub fn display_relative(workspace: &Path, path: &Path) -> String {
    let root = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());
    path.strip_prefix(&root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Lexically resolve `.` and `..` without touching the file system.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
