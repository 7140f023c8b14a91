//! `PATH`: lexical normalization and root-containment for client-supplied
//! path references. Grounded in spec.md §4.1.
//!
//! Normalization is purely lexical — symbolic links are never resolved here.
//! The deployment is expected to keep the served root free of symlinks that
//! would otherwise escape it; see spec.md §4.1's "Decision" note.

use crate::error::{Error, ErrorKind};

/// Maximum number of `/`-separated components a resolved path may have.
pub const MAX_PATH_COMPONENTS: usize = 128;

/// Splits `input` on `/`, folds `.` and `..` (popping never goes below the
/// leading `/`), drops empty segments (collapsing `//`), and reassembles
/// with a single leading `/`.
pub fn normalize(input: &str, path_max: usize) -> Result<String, Error> {
    let mut stack: Vec<&str> = Vec::new();
    for component in input.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            other => {
                stack.push(other);
                if stack.len() > MAX_PATH_COMPONENTS {
                    return Err(Error::new(ErrorKind::PathTooLong));
                }
            }
        }
    }
    let mut out = String::with_capacity(input.len() + 1);
    for segment in &stack {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    if out.len() >= path_max {
        return Err(Error::new(ErrorKind::PathTooLong));
    }
    Ok(out)
}

/// Resolves a client-supplied reference (`input`) against `cwd`, normalizes
/// it, and enforces that the result lies within `root`.
///
/// Per spec.md §9's binding resolution of the documented open question,
/// root containment is enforced *here*, not left to each call site: a
/// resolved path that would escape `root` fails with [`ErrorKind::PathInvalid`].
pub fn resolve(cwd: &str, input: &str, root: &str, path_max: usize) -> Result<String, Error> {
    let joined = if input.starts_with('/') {
        input.to_string()
    } else {
        format!("{}/{}", cwd, input)
    };
    let normalized = normalize(&joined, path_max)?;
    if !is_within_root(&normalized, root) {
        return Err(Error::new(ErrorKind::PathInvalid));
    }
    Ok(normalized)
}

/// True iff `root` is `/`, `path == root`, or `path` starts with `root + "/"`.
pub fn is_within_root(path: &str, root: &str) -> bool {
    if root == "/" {
        return true;
    }
    path == root || path.starts_with(&format!("{}/", root))
}

/// Secondary allowlist check applied to inputs before they reach the
/// filesystem: rejects embedded NULs, overlong strings, and any character
/// outside `[A-Za-z0-9/._\- ]`.
pub fn is_safe(path: &str, path_max: usize) -> bool {
    if path.len() >= path_max || path.contains('\0') {
        return false;
    }
    path.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'.' | b'_' | b'-' | b' '))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PMAX: usize = 4096;

    #[test]
    fn normalize_collapses_dots_and_slashes() {
        assert_eq!(normalize("/a/./b//c/../d", PMAX).unwrap(), "/a/b/d");
    }

    #[test]
    fn normalize_never_pops_below_root() {
        assert_eq!(normalize("/../../..", PMAX).unwrap(), "/");
        assert_eq!(normalize("../../foo", PMAX).unwrap(), "/foo");
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = ["/a/b/c", "/a/./b/../c", "//weird//", "/", "/.."];
        for i in inputs {
            let once = normalize(i, PMAX).unwrap();
            let twice = normalize(&once, PMAX).unwrap();
            assert_eq!(once, twice, "not idempotent for {i:?}");
        }
    }

    #[test]
    fn normalize_rejects_too_many_components() {
        let deep = "/seg".repeat(MAX_PATH_COMPONENTS + 1);
        assert_eq!(normalize(&deep, PMAX).unwrap_err().kind(), ErrorKind::PathTooLong);
    }

    #[test]
    fn resolve_relative_against_cwd() {
        assert_eq!(resolve("/home/anon", "pics", "/", PMAX).unwrap(), "/home/anon/pics");
        assert_eq!(resolve("/home/anon", "/pub", "/", PMAX).unwrap(), "/pub");
    }

    #[test]
    fn resolve_blocks_traversal_out_of_root() {
        let err = resolve("/served", "../etc/passwd", "/served", PMAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PathInvalid);
    }

    #[test]
    fn resolve_allows_traversal_that_stays_within_root() {
        assert_eq!(resolve("/served/a/b", "../../x", "/served", PMAX).unwrap(), "/served/x");
    }

    #[test]
    fn is_within_root_handles_root_boundary() {
        assert!(is_within_root("/srv", "/srv"));
        assert!(is_within_root("/srv/a", "/srv"));
        assert!(!is_within_root("/srvish", "/srv"));
        assert!(is_within_root("/anything", "/"));
    }

    #[test]
    fn is_safe_rejects_bad_characters_and_nul() {
        assert!(is_safe("/a/b_c-d.e f", PMAX));
        assert!(!is_safe("/a\0b", PMAX));
        assert!(!is_safe("/a;rm -rf", PMAX));
    }
}
