//! Path utilities.
//!
//! These are purely lexical. `..` is kept as a segment so the resolver can
//! climb across mount boundaries; only `clean` folds it away.

use crate::errno::Errno;

/// Longest single path component.
pub const NAME_MAX: usize = 255;

/// Longest whole path.
pub const PATH_MAX: usize = 4096;

/// Split a path into segments, dropping empty and `.` components.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

/// Validate lengths before resolution.
pub fn check_lengths(path: &str) -> Result<(), Errno> {
    if path.is_empty() {
        return Err(Errno::ENOENT);
    }
    if path.len() >= PATH_MAX || segments(path).iter().any(|s| s.len() > NAME_MAX) {
        return Err(Errno::ENAMETOOLONG);
    }
    if path.contains('\0') {
        return Err(Errno::EINVAL);
    }
    Ok(())
}

/// Lexically clean an absolute path: fold `.`, `..` and repeated slashes.
/// `..` at the root stays at the root.
pub fn clean(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for seg in segments(path) {
        if seg == ".." {
            stack.pop();
        } else {
            stack.push(seg);
        }
    }
    if stack.is_empty() {
        "/".to_string()
    } else {
        let mut out = String::new();
        for seg in stack {
            out.push('/');
            out.push_str(seg);
        }
        out
    }
}

/// Join `name` onto `base`, returning `name` unchanged if it is absolute.
pub fn join(base: &str, name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Split into parent directory and final component.
///
/// `split("/a/b")` is `("/a", "b")`; `split("b")` is `(".", "b")`.
pub fn split(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return ("/", "");
    }
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => (".", trimmed),
    }
}

/// Whether `path` is `base` or lies beneath it.
pub fn is_under(path: &str, base: &str) -> bool {
    if base == "/" {
        return path.starts_with('/');
    }
    path.starts_with(base) && (path.len() == base.len() || path.as_bytes()[base.len()] == b'/')
}
