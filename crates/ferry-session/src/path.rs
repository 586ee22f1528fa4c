//! Remote path helpers.
//!
//! Remote keys always use `/` as separator regardless of the host platform.
//! The empty string denotes the namespace root.

use std::path::{Path, MAIN_SEPARATOR};

/// Lexically normalize a remote path: collapse repeated separators, drop `.`
/// segments and resolve `..` where possible. `"."` and `""` both clean to `""`.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Join two remote path fragments and normalize the result.
pub fn join(base: &str, path: &str) -> String {
    match (base.is_empty(), path.is_empty()) {
        (true, true) => String::new(),
        (true, false) => clean(path),
        (false, true) => clean(base),
        (false, false) => clean(&format!("{base}/{path}")),
    }
}

/// Split a key into `(parent, name)`. The parent of a top-level key is `""`.
pub fn split(key: &str) -> (&str, &str) {
    match key.rsplit_once('/') {
        Some((parent, name)) => (parent, name),
        None => ("", key),
    }
}

/// Render a local path with forward slashes for remote use.
pub fn to_slash(path: &Path) -> String {
    let text = path.to_string_lossy();
    if MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(MAIN_SEPARATOR, "/")
    }
}

/// Whether a remote-facing path is absolute, in either the remote (`/x`) or
/// host-native sense.
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/') || Path::new(path).is_absolute()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_collapses_segments() {
        assert_eq!(clean("a//b/./c/"), "a/b/c");
        assert_eq!(clean("a/b/../c"), "a/c");
        assert_eq!(clean("../a"), "../a");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("."), "");
        assert_eq!(clean(""), "");
        assert_eq!(clean("/"), "/");
    }

    #[test]
    fn join_handles_empty_sides() {
        assert_eq!(join("", ""), "");
        assert_eq!(join("", "x.txt"), "x.txt");
        assert_eq!(join("dir", ""), "dir");
        assert_eq!(join("dir/", "/x.txt"), "dir/x.txt");
        assert_eq!(join("/srv", "a/b"), "/srv/a/b");
    }

    #[test]
    fn split_key() {
        assert_eq!(split("a/b/c.txt"), ("a/b", "c.txt"));
        assert_eq!(split("c.txt"), ("", "c.txt"));
    }

    #[test]
    fn absolute_detection() {
        assert!(is_absolute("/srv/data"));
        assert!(!is_absolute("data/x"));
    }

    #[test]
    fn to_slash_on_relative_path() {
        let p = Path::new("a").join("b").join("c.txt");
        assert_eq!(to_slash(&p), "a/b/c.txt");
    }
}
