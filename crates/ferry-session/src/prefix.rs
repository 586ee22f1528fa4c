use crate::error::SessionResult;
use crate::object::ObjectInfo;
use crate::path;
use crate::traits::{ObjectReader, ObjectWriter, Session};

/// Session adapter that rebases every path under a fixed directory.
///
/// Wrapping an already prefixed session joins the prefixes, so
/// `PrefixedSession::new(PrefixedSession::new(s, "a"), "b")` addresses `a/b/…`.
#[derive(Debug)]
pub struct PrefixedSession<S> {
    inner: S,
    dir: String,
}

impl<S: Session> PrefixedSession<S> {
    pub fn new(inner: S, dir: impl Into<String>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    /// The directory every path is rebased under.
    pub fn dir(&self) -> &str {
        &self.dir
    }

    /// Borrow the wrapped session.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwrap the decorator.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn rebase(&self, remote_path: &str) -> String {
        path::join(&self.dir, remote_path)
    }
}

/// Rebase `session` under `dir`. An empty `dir` returns the session unchanged.
pub fn with_prefix(session: Box<dyn Session>, dir: &str) -> Box<dyn Session> {
    if dir.is_empty() {
        return session;
    }
    Box::new(PrefixedSession::new(session, dir))
}

impl<S: Session> Session for PrefixedSession<S> {
    fn list(&self, remote_path: &str) -> SessionResult<Vec<ObjectInfo>> {
        self.inner.list(&self.rebase(remote_path))
    }

    fn open_read(&self, key: &str) -> SessionResult<Box<dyn ObjectReader>> {
        self.inner.open_read(&self.rebase(key))
    }

    fn open_write(&self, key: &str) -> SessionResult<Box<dyn ObjectWriter>> {
        self.inner.open_write(&self.rebase(key))
    }

    fn write_whole(&self, key: &str, data: &[u8]) -> SessionResult<()> {
        self.inner.write_whole(&self.rebase(key), data)
    }

    fn exists(&self, key: &str) -> SessionResult<bool> {
        self.inner.exists(&self.rebase(key))
    }

    fn rename(&self, from: &str, to: &str) -> SessionResult<()> {
        self.inner.rename(&self.rebase(from), &self.rebase(to))
    }

    fn delete(&self, key: &str) -> SessionResult<()> {
        self.inner.delete(&self.rebase(key))
    }

    fn close(&self) -> SessionResult<()> {
        self.inner.close()
    }
}
