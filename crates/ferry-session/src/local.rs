use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{SessionError, SessionResult};
use crate::object::ObjectInfo;
use crate::path;
use crate::traits::{ObjectReader, ObjectWriter, Session};

/// Session over a directory of the local filesystem.
///
/// Keys are resolved relative to `root`. A leading `/` does not escape it,
/// and a key whose `..` segments climb above the root is a usage error.
/// Writes go to a temporary file next to the target and are renamed into
/// place on close.
#[derive(Clone, Debug)]
pub struct LocalSession {
    root: PathBuf,
}

impl LocalSession {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> SessionResult<PathBuf> {
        let relative = path::clean(key.trim_start_matches('/'));
        if relative == ".." || relative.starts_with("../") {
            return Err(SessionError::Usage(format!(
                "key {key:?} resolves outside the session root"
            )));
        }
        if relative.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(relative))
        }
    }
}

fn modified_time(meta: &fs::Metadata) -> Option<DateTime<Utc>> {
    meta.modified().ok().map(DateTime::<Utc>::from)
}

impl Session for LocalSession {
    fn list(&self, remote_path: &str) -> SessionResult<Vec<ObjectInfo>> {
        let dir = self.resolve(remote_path)?;
        let read_dir = fs::read_dir(&dir).map_err(|e| SessionError::from_io(e, remote_path))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let meta = entry.metadata()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let info = if meta.is_dir() {
                ObjectInfo::dir(name, modified_time(&meta))
            } else {
                ObjectInfo::file(name, Some(meta.len()), modified_time(&meta))
            };
            entries.push(info);
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open_read(&self, key: &str) -> SessionResult<Box<dyn ObjectReader>> {
        let file = File::open(self.resolve(key)?).map_err(|e| SessionError::from_io(e, key))?;
        Ok(Box::new(LocalReader { file: Some(file) }))
    }

    fn open_write(&self, key: &str) -> SessionResult<Box<dyn ObjectWriter>> {
        let target = self.resolve(key)?;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)?;
        let temp = NamedTempFile::new_in(&parent)?;
        Ok(Box::new(LocalWriter {
            target,
            temp: Some(temp),
            failure: None,
        }))
    }

    fn exists(&self, key: &str) -> SessionResult<bool> {
        match fs::metadata(self.resolve(key)?) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionError::Io(e)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> SessionResult<()> {
        fs::rename(self.resolve(from)?, self.resolve(to)?)
            .map_err(|e| SessionError::from_io(e, from))
    }

    fn delete(&self, key: &str) -> SessionResult<()> {
        let target = self.resolve(key)?;
        debug!(path = %target.display(), "deleting local file");
        fs::remove_file(&target).map_err(|e| SessionError::from_io(e, key))
    }

    fn close(&self) -> SessionResult<()> {
        Ok(())
    }
}

struct LocalReader {
    file: Option<File>,
}

impl Read for LocalReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(SessionError::Closed.into_io()),
        }
    }
}

impl ObjectReader for LocalReader {
    fn close(&mut self) -> SessionResult<()> {
        self.file = None;
        Ok(())
    }
}

struct LocalWriter {
    target: PathBuf,
    temp: Option<NamedTempFile>,
    /// Kind and message of a failed close, replayed on later calls.
    failure: Option<(io::ErrorKind, String)>,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.temp.as_mut() {
            Some(temp) => temp.write(buf),
            None => Err(SessionError::Closed.into_io()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.temp.as_mut() {
            Some(temp) => temp.flush(),
            None => Ok(()),
        }
    }
}

impl ObjectWriter for LocalWriter {
    fn close(&mut self) -> SessionResult<()> {
        if let Some((kind, message)) = &self.failure {
            return Err(SessionError::Io(io::Error::new(*kind, message.clone())));
        }
        let Some(mut temp) = self.temp.take() else {
            return Ok(());
        };
        let result = match temp.flush() {
            Ok(()) => temp.persist(&self.target).map(drop).map_err(|e| e.error),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            self.failure = Some((err.kind(), err.to_string()));
            return Err(SessionError::Io(err));
        }
        Ok(())
    }
}
