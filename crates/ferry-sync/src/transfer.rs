use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use ferry_session::{Session, SessionError};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Stream a local file into `remote`. Returns the bytes copied.
///
/// The remote object only appears once the writer closes successfully; on
/// any error the writer is dropped, which discards what was sent.
pub fn upload_file<S: Session + ?Sized>(
    session: &S,
    local: &Path,
    remote: &str,
) -> SyncResult<u64> {
    let mut source = File::open(local).map_err(|e| SyncError::local(local, e))?;
    let mut writer = session.open_write(remote)?;
    let copied = io::copy(&mut source, &mut writer).map_err(SessionError::from)?;
    writer.close()?;
    debug!(local = %local.display(), remote, bytes = copied, "file uploaded");
    Ok(copied)
}

/// Stream `remote` into a local file. Returns the bytes copied.
///
/// Data lands in a temporary file beside `local` that is renamed into place
/// after the remote stream closes cleanly, so a failed download never
/// leaves a truncated file behind.
pub fn download_file<S: Session + ?Sized>(
    session: &S,
    remote: &str,
    local: &Path,
) -> SyncResult<u64> {
    let mut reader = session.open_read(remote)?;
    let parent = match local.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| SyncError::local(parent, e))?;

    let copied = io::copy(&mut reader, &mut temp);
    let closed = reader.close();
    let copied = copied.map_err(SessionError::from)?;
    closed?;

    temp.flush().map_err(|e| SyncError::local(local, e))?;
    temp.persist(local)
        .map_err(|e| SyncError::local(local, e.error))?;
    debug!(remote, local = %local.display(), bytes = copied, "file downloaded");
    Ok(copied)
}

/// Delete `remote`, treating "not found" as nothing to do.
///
/// Returns whether an object was removed.
pub fn delete_if_exists<S: Session + ?Sized>(session: &S, remote: &str) -> SyncResult<bool> {
    match session.delete(remote) {
        Ok(()) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Remove a local file after it has been uploaded.
pub(crate) fn remove_local(path: &Path) -> SyncResult<()> {
    fs::remove_file(path).map_err(|e| SyncError::local(path, e))
}
