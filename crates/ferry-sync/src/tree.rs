//! Directory synchronization.
//!
//! Uploads stop at the first failure. Downloads keep going and report every
//! failed path at the end in a single [`SyncError::Partial`].

use std::fs;
use std::path::Path;

use ferry_session::{path, ObjectInfo, Session};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Action, SyncError, SyncResult, TransferFailure};
use crate::transfer::{delete_if_exists, download_file, remove_local, upload_file};

/// Per-call switches for [`upload_dir`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadOptions {
    /// Remove an existing remote object before writing the new one.
    pub delete_before_upload: bool,
    /// Remove each local file once its upload has succeeded.
    pub delete_after_upload: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            delete_before_upload: true,
            delete_after_upload: false,
        }
    }
}

/// Counts for a finished directory transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub files: u64,
    pub bytes: u64,
}

impl TransferReport {
    fn record(&mut self, bytes: u64) {
        self.files += 1;
        self.bytes += bytes;
    }
}

/// Upload every file under `local_dir` to the matching key under
/// `remote_dir`, in file-name order.
pub fn upload_dir<S: Session + ?Sized>(
    session: &S,
    local_dir: &Path,
    remote_dir: &str,
    options: &UploadOptions,
) -> SyncResult<TransferReport> {
    let mut report = TransferReport::default();
    let walker = WalkDir::new(local_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|err| {
            let path = err
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| local_dir.to_path_buf());
            SyncError::local(path, err.into())
        })?;
        if !entry.file_type().is_file() {
            if !entry.file_type().is_dir() {
                warn!(path = %entry.path().display(), "skipping non-regular file");
            }
            continue;
        }

        let local = entry.path();
        let relative = local.strip_prefix(local_dir).unwrap_or(local);
        let remote = path::join(remote_dir, &path::to_slash(relative));
        let context = |action: Action, err: SyncError| SyncError::Transfer {
            action,
            local: local.to_path_buf(),
            remote: remote.clone(),
            source: Box::new(err),
        };

        if options.delete_before_upload {
            delete_if_exists(session, &remote)
                .map_err(|e| context(Action::DeleteBeforeUpload, e))?;
        }
        let bytes =
            upload_file(session, local, &remote).map_err(|e| context(Action::Upload, e))?;
        if options.delete_after_upload {
            remove_local(local).map_err(|e| context(Action::DeleteAfterUpload, e))?;
        }
        info!(local = %local.display(), remote = %remote, bytes, "uploaded");
        report.record(bytes);
    }
    Ok(report)
}

/// Download every object under `remote_dir` into `local_dir`, recreating
/// the directory layout.
///
/// After each successful download `delete_remote(remote_key, local_path)`
/// decides whether the remote object is removed. Failing paths are
/// collected and returned together once the whole tree has been visited.
pub fn download_dir<S, F>(
    session: &S,
    remote_dir: &str,
    local_dir: &Path,
    mut delete_remote: F,
) -> SyncResult<TransferReport>
where
    S: Session + ?Sized,
    F: FnMut(&str, &Path) -> bool,
{
    let entries = session.list(remote_dir)?;
    let mut walk = DownloadWalk {
        session,
        delete_remote: &mut delete_remote,
        report: TransferReport::default(),
        failures: Vec::new(),
    };
    walk.entries(entries, remote_dir, local_dir);

    if walk.failures.is_empty() {
        Ok(walk.report)
    } else {
        warn!(
            failed = walk.failures.len(),
            downloaded = walk.report.files,
            "directory download finished with failures"
        );
        Err(SyncError::Partial(walk.failures))
    }
}

struct DownloadWalk<'a, S: ?Sized, F> {
    session: &'a S,
    delete_remote: &'a mut F,
    report: TransferReport,
    failures: Vec<TransferFailure>,
}

impl<S, F> DownloadWalk<'_, S, F>
where
    S: Session + ?Sized,
    F: FnMut(&str, &Path) -> bool,
{
    fn fail(&mut self, remote: String, error: SyncError) {
        debug!(remote = %remote, error = %error, "download failure recorded");
        self.failures.push(TransferFailure { remote, error });
    }

    fn entries(&mut self, entries: Vec<ObjectInfo>, remote_dir: &str, local_dir: &Path) {
        for entry in entries {
            let remote = path::join(remote_dir, &entry.name);
            let local = local_dir.join(&entry.name);
            if entry.is_dir {
                match self.session.list(&remote) {
                    Ok(children) => self.entries(children, &remote, &local),
                    Err(err) => self.fail(remote, err.into()),
                }
            } else {
                self.file(remote, &local);
            }
        }
    }

    fn file(&mut self, remote: String, local: &Path) {
        if let Some(parent) = local.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                self.fail(remote, SyncError::local(parent, err));
                return;
            }
        }
        let bytes = match download_file(self.session, &remote, local) {
            Ok(bytes) => bytes,
            Err(err) => {
                self.fail(remote, err);
                return;
            }
        };
        info!(remote = %remote, local = %local.display(), bytes, "downloaded");
        self.report.record(bytes);

        if (self.delete_remote)(&remote, local) {
            if let Err(err) = self.session.delete(&remote) {
                let error = SyncError::Transfer {
                    action: Action::DeleteAfterDownload,
                    local: local.to_path_buf(),
                    remote: remote.clone(),
                    source: Box::new(err.into()),
                };
                self.fail(remote, error);
            }
        }
    }
}
