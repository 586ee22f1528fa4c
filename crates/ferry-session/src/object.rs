use chrono::{DateTime, Utc};
use serde::Serialize;

/// One entry returned by [`Session::list`](crate::Session::list).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    /// Entry name relative to the listed path.
    pub name: String,
    /// Logical size in bytes, `None` when the backend cannot tell.
    pub size: Option<u64>,
    /// Modification time, or the latest chunk creation time for chunked stores.
    pub modified: Option<DateTime<Utc>>,
    /// `true` for directories (only hierarchical backends report them).
    pub is_dir: bool,
}

impl ObjectInfo {
    /// A regular object entry.
    pub fn file(name: impl Into<String>, size: Option<u64>, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
            is_dir: false,
        }
    }

    /// A directory entry.
    pub fn dir(name: impl Into<String>, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.into(),
            size: None,
            modified,
            is_dir: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors() {
        let f = ObjectInfo::file("a.txt", Some(3), None);
        assert!(!f.is_dir);
        assert_eq!(f.size, Some(3));

        let d = ObjectInfo::dir("sub", None);
        assert!(d.is_dir);
        assert_eq!(d.size, None);
    }

    #[test]
    fn serializes_unknown_size_as_null() {
        let f = ObjectInfo::file("a.txt", None, None);
        let json = serde_json::to_value(&f).unwrap();
        assert!(json["size"].is_null());
        assert_eq!(json["name"], "a.txt");
    }
}
