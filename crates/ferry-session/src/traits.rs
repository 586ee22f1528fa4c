use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::SessionResult;
use crate::object::ObjectInfo;
use crate::path;

/// A byte stream opened by [`Session::open_read`].
///
/// Bytes come back in the order they were written, whatever buffer size the
/// caller reads with.
pub trait ObjectReader: Read + Send {
    /// Release the underlying cursor or handle. Closing twice is harmless.
    fn close(&mut self) -> SessionResult<()>;
}

/// A byte stream opened by [`Session::open_write`].
///
/// Nothing written becomes durably visible until `close` returns `Ok`.
/// Dropping a writer without closing it discards the data.
pub trait ObjectWriter: Write + Send {
    /// Flush buffered data and make the object visible. Calling `close` again
    /// after a successful close is a no-op; after a failure it returns the
    /// first error again.
    fn close(&mut self) -> SessionResult<()>;
}

/// Uniform access to one storage namespace.
///
/// Implementations must be `Send + Sync`. Streams returned by `open_read` and
/// `open_write` are owned by a single caller and must not be shared.
pub trait Session: Send + Sync {
    /// List the immediate children of `path` (not recursive).
    ///
    /// Flat backends accept only the empty root path.
    fn list(&self, path: &str) -> SessionResult<Vec<ObjectInfo>>;

    /// Open an object for streaming reads.
    ///
    /// Fails with [`SessionError::NotFound`](crate::SessionError::NotFound)
    /// when nothing is stored under `key`.
    fn open_read(&self, key: &str) -> SessionResult<Box<dyn ObjectReader>>;

    /// Create or replace the object at `key`.
    fn open_write(&self, key: &str) -> SessionResult<Box<dyn ObjectWriter>>;

    /// Write a small object in one call.
    fn write_whole(&self, key: &str, data: &[u8]) -> SessionResult<()> {
        let mut writer = self.open_write(key)?;
        writer.write_all(data)?;
        writer.close()
    }

    /// Check whether an object exists.
    ///
    /// The default lists the parent namespace and matches by name.
    fn exists(&self, key: &str) -> SessionResult<bool> {
        exists_by_listing(self, key)
    }

    /// Move an object to a new key.
    fn rename(&self, from: &str, to: &str) -> SessionResult<()>;

    /// Remove an object. Whether a missing object is an error is backend
    /// specific; callers use [`SessionError::is_not_found`](crate::SessionError::is_not_found)
    /// to treat it as a no-op.
    fn delete(&self, key: &str) -> SessionResult<()>;

    /// Release backend resources.
    fn close(&self) -> SessionResult<()>;
}

/// Existence check for backends without a direct query: list the parent and
/// look for the name. A listing failure is returned, never mapped to `false`.
pub fn exists_by_listing<S: Session + ?Sized>(session: &S, key: &str) -> SessionResult<bool> {
    let cleaned = path::clean(key);
    let (parent, name) = path::split(&cleaned);
    let entries = session.list(parent)?;
    Ok(entries.iter().any(|entry| entry.name == name))
}

impl<S: Session + ?Sized> Session for Box<S> {
    fn list(&self, path: &str) -> SessionResult<Vec<ObjectInfo>> {
        (**self).list(path)
    }

    fn open_read(&self, key: &str) -> SessionResult<Box<dyn ObjectReader>> {
        (**self).open_read(key)
    }

    fn open_write(&self, key: &str) -> SessionResult<Box<dyn ObjectWriter>> {
        (**self).open_write(key)
    }

    fn write_whole(&self, key: &str, data: &[u8]) -> SessionResult<()> {
        (**self).write_whole(key, data)
    }

    fn exists(&self, key: &str) -> SessionResult<bool> {
        (**self).exists(key)
    }

    fn rename(&self, from: &str, to: &str) -> SessionResult<()> {
        (**self).rename(from, to)
    }

    fn delete(&self, key: &str) -> SessionResult<()> {
        (**self).delete(key)
    }

    fn close(&self) -> SessionResult<()> {
        (**self).close()
    }
}

impl<S: Session + ?Sized> Session for Arc<S> {
    fn list(&self, path: &str) -> SessionResult<Vec<ObjectInfo>> {
        (**self).list(path)
    }

    fn open_read(&self, key: &str) -> SessionResult<Box<dyn ObjectReader>> {
        (**self).open_read(key)
    }

    fn open_write(&self, key: &str) -> SessionResult<Box<dyn ObjectWriter>> {
        (**self).open_write(key)
    }

    fn write_whole(&self, key: &str, data: &[u8]) -> SessionResult<()> {
        (**self).write_whole(key, data)
    }

    fn exists(&self, key: &str) -> SessionResult<bool> {
        (**self).exists(key)
    }

    fn rename(&self, from: &str, to: &str) -> SessionResult<()> {
        (**self).rename(from, to)
    }

    fn delete(&self, key: &str) -> SessionResult<()> {
        (**self).delete(key)
    }

    fn close(&self) -> SessionResult<()> {
        (**self).close()
    }
}
