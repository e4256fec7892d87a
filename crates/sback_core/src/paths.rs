//! Path handling at the filesystem boundary.
//!
//! Two representations exist: absolute paths used only when touching the
//! filesystem, and POSIX-normalized workspace-relative paths used everywhere
//! else (catalog, manifests, journals). Conversions happen only here.

use crate::error::{Result, SbError};
use std::path::{Component, Path, PathBuf};

/// Converts an absolute event path into the stored relative form.
///
/// The result uses `/` separators, contains no `..` or `.` segments, no
/// NUL bytes, and no leading `/`. `workspace_root` must be absolute and is
/// compared lexically (the file may no longer exist for delete events, so
/// no canonicalization happens here).
///
/// # Errors
///
/// Returns `InvalidPath` when the path is not under the workspace root,
/// is not valid UTF-8, or violates a normalization rule.
pub fn normalize_rel(workspace_root: &Path, absolute: &Path) -> Result<String> {
    let abs = lexical_clean(absolute)?;
    let root = lexical_clean(workspace_root)?;

    let rel = abs.strip_prefix(&root).map_err(|_| SbError::InvalidPath {
        path: absolute.display().to_string(),
        reason: "outside the workspace root".into(),
    })?;

    let mut out = String::new();
    for comp in rel.components() {
        let seg = match comp {
            Component::Normal(s) => s.to_str().ok_or_else(|| SbError::InvalidPath {
                path: absolute.display().to_string(),
                reason: "not valid UTF-8".into(),
            })?,
            _ => {
                return Err(SbError::InvalidPath {
                    path: absolute.display().to_string(),
                    reason: "unexpected path component".into(),
                })
            }
        };
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(seg);
    }

    if out.is_empty() {
        return Err(SbError::InvalidPath {
            path: absolute.display().to_string(),
            reason: "refers to the workspace root itself".into(),
        });
    }

    validate_stored(&out)?;
    Ok(out)
}

/// Validates a path already in stored (relative POSIX) form.
///
/// Rejects absolute prefixes, `..` segments, empty segments, NUL bytes,
/// and backslash separators.
pub fn validate_stored(path: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(SbError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        })
    };

    if path.is_empty() {
        return reject("empty path");
    }
    if path.as_bytes().contains(&0) {
        return reject("contains NUL byte");
    }
    if path.starts_with('/') {
        return reject("absolute paths are not stored");
    }
    if path.contains('\\') {
        return reject("backslash separator");
    }
    for seg in path.split('/') {
        match seg {
            "" => return reject("empty segment"),
            "." => return reject("'.' segment"),
            ".." => return reject("'..' segment"),
            _ => {}
        }
    }
    Ok(())
}

/// Joins a stored relative path back onto the workspace root.
pub fn to_absolute(workspace_root: &Path, rel: &str) -> PathBuf {
    let mut out = workspace_root.to_path_buf();
    for seg in rel.split('/') {
        out.push(seg);
    }
    out
}

/// Compares two stored paths, case-folding on case-insensitive platforms.
pub fn stored_paths_equal(a: &str, b: &str) -> bool {
    #[cfg(any(target_os = "windows", target_os = "macos"))]
    {
        a.eq_ignore_ascii_case(b)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        a == b
    }
}

/// Lexically resolves `.` and `..` components without touching the
/// filesystem. Fails on `..` escaping above the root of the path.
fn lexical_clean(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(SbError::InvalidPath {
                        path: path.display().to_string(),
                        reason: "'..' escapes the filesystem root".into(),
                    });
                }
            }
            Component::Normal(s) => out.push(s),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_basic() {
        let rel = normalize_rel(Path::new("/work"), Path::new("/work/src/main.rs")).unwrap();
        assert_eq!(rel, "src/main.rs");
    }

    #[test]
    fn test_normalize_resolves_dots() {
        let rel = normalize_rel(Path::new("/work"), Path::new("/work/src/./../src/a.rs")).unwrap();
        assert_eq!(rel, "src/a.rs");
    }

    #[test]
    fn test_normalize_rejects_outside_root() {
        let err = normalize_rel(Path::new("/work"), Path::new("/other/a.rs")).unwrap_err();
        assert!(matches!(err, SbError::InvalidPath { .. }));
    }

    #[test]
    fn test_normalize_rejects_escape_via_dotdot() {
        let err = normalize_rel(Path::new("/work"), Path::new("/work/../etc/passwd")).unwrap_err();
        assert!(matches!(err, SbError::InvalidPath { .. }));
    }

    #[test]
    fn test_normalize_rejects_root_itself() {
        assert!(normalize_rel(Path::new("/work"), Path::new("/work")).is_err());
    }

    #[test]
    fn test_validate_stored_rejects() {
        assert!(validate_stored("").is_err());
        assert!(validate_stored("/abs").is_err());
        assert!(validate_stored("a/../b").is_err());
        assert!(validate_stored("a//b").is_err());
        assert!(validate_stored("a\\b").is_err());
        assert!(validate_stored("a/./b").is_err());
        assert!(validate_stored("src/ok.rs").is_ok());
    }

    #[test]
    fn test_validate_stored_rejects_nul() {
        assert!(validate_stored("a\0b").is_err());
    }

    #[test]
    fn test_to_absolute_roundtrip() {
        let abs = to_absolute(Path::new("/work"), "src/deep/file.rs");
        assert_eq!(abs, PathBuf::from("/work/src/deep/file.rs"));
        assert_eq!(normalize_rel(Path::new("/work"), &abs).unwrap(), "src/deep/file.rs");
    }
}
