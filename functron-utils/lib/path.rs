//! Utility functions for working with paths.

use std::path::{Component, Path, PathBuf};

use crate::{FunctronUtilsError, FunctronUtilsResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kinds of path `normalize_path` accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedPathType {
    /// Either absolute or relative paths.
    Any,

    /// Only paths starting with `/`.
    Absolute,

    /// Only paths not starting with `/`.
    Relative,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Normalizes a `/`-separated path lexically, removing `.` segments, repeated
/// separators and resolving `..` against preceding segments.
///
/// A `..` that would climb above the start of the path is an error rather than
/// being silently dropped.
///
/// ## Examples
///
/// ```
/// use functron_utils::{normalize_path, SupportedPathType};
///
/// assert_eq!(
///     normalize_path("/data//app/./logs/../bin", SupportedPathType::Absolute).unwrap(),
///     "/data/app/bin"
/// );
/// assert!(normalize_path("../etc", SupportedPathType::Relative).is_err());
/// ```
pub fn normalize_path(path: &str, path_type: SupportedPathType) -> FunctronUtilsResult<String> {
    if path.is_empty() {
        return Err(FunctronUtilsError::PathValidation(
            "path cannot be empty".to_string(),
        ));
    }

    let is_absolute = path.starts_with('/');
    match path_type {
        SupportedPathType::Absolute if !is_absolute => {
            return Err(FunctronUtilsError::PathValidation(format!(
                "path '{}' must be absolute",
                path
            )));
        }
        SupportedPathType::Relative if is_absolute => {
            return Err(FunctronUtilsError::PathValidation(format!(
                "path '{}' must be relative",
                path
            )));
        }
        _ => {}
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(FunctronUtilsError::PathValidation(format!(
                        "path '{}' traverses above its root",
                        path
                    )));
                }
            }
            segment => segments.push(segment),
        }
    }

    if is_absolute {
        Ok(format!("/{}", segments.join("/")))
    } else {
        Ok(segments.join("/"))
    }
}

/// Resolves `entry` against `root` without touching the filesystem and checks
/// that the result stays inside `root`.
///
/// Absolute entries, drive prefixes and `..` segments that climb above `root`
/// all fail with [`FunctronUtilsError::PathEscape`]. A relative `root` is made
/// absolute against the current directory first.
pub fn resolve_within(root: &Path, entry: &Path) -> FunctronUtilsResult<PathBuf> {
    let root = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()?.join(root)
    };

    let escape = || FunctronUtilsError::PathEscape {
        root: root.clone(),
        path: entry.to_path_buf(),
    };

    let mut resolved = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => resolved.push(part),
            Component::ParentDir => {
                if !resolved.pop() {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }

    let target = root.join(resolved);
    if !target.starts_with(&root) {
        return Err(escape());
    }

    Ok(target)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
