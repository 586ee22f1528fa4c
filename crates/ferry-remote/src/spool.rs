use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use ferry_session::{ObjectInfo, ObjectReader, ObjectWriter, Session, SessionError, SessionResult};
use tracing::debug;

/// Operations a file-server client offers over its control connection.
///
/// Paths are passed through as given; relative paths resolve against the
/// server's working directory.
pub trait RemoteFs: Send + 'static {
    fn list(&mut self, dir: &str) -> SessionResult<Vec<ObjectInfo>>;

    /// Copy the file at `path` into `sink`, returning the byte count.
    fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> SessionResult<u64>;

    /// Create or replace the file at `path` with everything `source` yields.
    fn store(&mut self, path: &str, source: &mut dyn Read) -> SessionResult<u64>;

    fn rename(&mut self, from: &str, to: &str) -> SessionResult<()>;

    fn remove(&mut self, path: &str) -> SessionResult<()>;

    /// End the session with the server.
    fn quit(&mut self) -> SessionResult<()>;
}

/// [`Session`] over a [`RemoteFs`] client.
///
/// Reads download the whole file into a temporary file before the reader is
/// returned; writes collect into a temporary file and upload on close. The
/// control connection is held only for the duration of each transfer.
pub struct RemoteSession<F> {
    fs: Arc<Mutex<F>>,
}

impl<F: RemoteFs> RemoteSession<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs: Arc::new(Mutex::new(fs)),
        }
    }

    /// Run `f` with exclusive use of the client.
    pub fn with_client<T>(&self, f: impl FnOnce(&mut F) -> T) -> T {
        let mut fs = self.fs.lock().expect("lock poisoned");
        f(&mut fs)
    }
}

impl<F: RemoteFs> Session for RemoteSession<F> {
    fn list(&self, path: &str) -> SessionResult<Vec<ObjectInfo>> {
        let mut entries = self.with_client(|fs| fs.list(path))?;
        entries.retain(|entry| entry.name != "." && entry.name != "..");
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open_read(&self, key: &str) -> SessionResult<Box<dyn ObjectReader>> {
        let mut spool = tempfile::tempfile()?;
        let bytes = self.with_client(|fs| fs.retrieve(key, &mut spool))?;
        spool.seek(SeekFrom::Start(0))?;
        debug!(key, bytes, "remote object spooled for reading");
        Ok(Box::new(SpoolReader { file: Some(spool) }))
    }

    fn open_write(&self, key: &str) -> SessionResult<Box<dyn ObjectWriter>> {
        Ok(Box::new(SpoolWriter {
            fs: Arc::clone(&self.fs),
            key: key.to_string(),
            spool: Some(tempfile::tempfile()?),
            failure: None,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> SessionResult<()> {
        self.with_client(|fs| fs.rename(from, to))
    }

    fn delete(&self, key: &str) -> SessionResult<()> {
        self.with_client(|fs| fs.remove(key))
    }

    fn close(&self) -> SessionResult<()> {
        self.with_client(|fs| fs.quit())
    }
}

struct SpoolReader {
    file: Option<File>,
}

impl Read for SpoolReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(SessionError::Closed.into_io()),
        }
    }
}

impl ObjectReader for SpoolReader {
    fn close(&mut self) -> SessionResult<()> {
        self.file = None;
        Ok(())
    }
}

struct SpoolWriter<F> {
    fs: Arc<Mutex<F>>,
    key: String,
    spool: Option<File>,
    /// Message of a failed upload, replayed on later closes.
    failure: Option<String>,
}

impl<F: RemoteFs> SpoolWriter<F> {
    fn upload(&mut self, mut spool: File) -> SessionResult<u64> {
        spool.flush()?;
        spool.seek(SeekFrom::Start(0))?;
        let mut fs = self.fs.lock().expect("lock poisoned");
        fs.store(&self.key, &mut spool)
    }
}

impl<F: RemoteFs> Write for SpoolWriter<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.spool.as_mut() {
            Some(spool) => spool.write(buf),
            None => Err(SessionError::Closed.into_io()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.spool.as_mut() {
            Some(spool) => spool.flush(),
            None => Ok(()),
        }
    }
}

impl<F: RemoteFs> ObjectWriter for SpoolWriter<F> {
    fn close(&mut self) -> SessionResult<()> {
        if let Some(message) = &self.failure {
            return Err(SessionError::Backend(message.clone()));
        }
        let Some(spool) = self.spool.take() else {
            return Ok(());
        };
        match self.upload(spool) {
            Ok(bytes) => {
                debug!(key = %self.key, bytes, "remote object stored");
                Ok(())
            }
            Err(err) => {
                self.failure = Some(err.to_string());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    /// Server double keeping files in a map; `fail_stores` rejects uploads.
    #[derive(Default)]
    struct MapFs {
        files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
        fail_stores: bool,
        quit: bool,
    }

    impl RemoteFs for MapFs {
        fn list(&mut self, dir: &str) -> SessionResult<Vec<ObjectInfo>> {
            let files = self.files.lock().unwrap();
            let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
            let mut entries = vec![ObjectInfo::dir(".", None), ObjectInfo::dir("..", None)];
            for (name, data) in files.iter() {
                if let Some(rest) = name.strip_prefix(&prefix) {
                    entries.push(ObjectInfo::file(rest, Some(data.len() as u64), None));
                }
            }
            entries.reverse();
            Ok(entries)
        }

        fn retrieve(&mut self, path: &str, sink: &mut dyn Write) -> SessionResult<u64> {
            let files = self.files.lock().unwrap();
            let data = files
                .get(path)
                .ok_or_else(|| SessionError::NotFound(path.to_string()))?;
            sink.write_all(data)?;
            Ok(data.len() as u64)
        }

        fn store(&mut self, path: &str, source: &mut dyn Read) -> SessionResult<u64> {
            if self.fail_stores {
                return Err(SessionError::Backend("552 quota exceeded".into()));
            }
            let mut data = Vec::new();
            source.read_to_end(&mut data)?;
            let len = data.len() as u64;
            self.files.lock().unwrap().insert(path.to_string(), data);
            Ok(len)
        }

        fn rename(&mut self, from: &str, to: &str) -> SessionResult<()> {
            let mut files = self.files.lock().unwrap();
            let data = files
                .remove(from)
                .ok_or_else(|| SessionError::NotFound(from.to_string()))?;
            files.insert(to.to_string(), data);
            Ok(())
        }

        fn remove(&mut self, path: &str) -> SessionResult<()> {
            self.files
                .lock()
                .unwrap()
                .remove(path)
                .map(drop)
                .ok_or_else(|| SessionError::NotFound(path.to_string()))
        }

        fn quit(&mut self) -> SessionResult<()> {
            self.quit = true;
            Ok(())
        }
    }

    fn read_all(session: &dyn Session, key: &str) -> Vec<u8> {
        let mut reader = session.open_read(key).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        reader.close().unwrap();
        out
    }

    #[test]
    fn upload_happens_on_close_only() {
        let fs = MapFs::default();
        let files = Arc::clone(&fs.files);
        let session = RemoteSession::new(fs);

        let mut writer = session.open_write("a.txt").unwrap();
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        assert!(files.lock().unwrap().is_empty());
        writer.close().unwrap();
        writer.close().unwrap();
        assert_eq!(files.lock().unwrap()["a.txt"], b"hello world");
        assert!(writer.write_all(b"late").is_err());

        assert_eq!(read_all(&session, "a.txt"), b"hello world");
    }

    #[test]
    fn dropped_writer_uploads_nothing() {
        let fs = MapFs::default();
        let files = Arc::clone(&fs.files);
        let session = RemoteSession::new(fs);
        {
            let mut writer = session.open_write("a.txt").unwrap();
            writer.write_all(b"partial").unwrap();
        }
        assert!(files.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_upload_is_latched() {
        let fs = MapFs {
            fail_stores: true,
            ..MapFs::default()
        };
        let session = RemoteSession::new(fs);
        let mut writer = session.open_write("a.txt").unwrap();
        writer.write_all(b"x").unwrap();
        assert!(matches!(writer.close(), Err(SessionError::Backend(_))));
        assert!(matches!(writer.close(), Err(SessionError::Backend(msg)) if msg.contains("552")));
    }

    #[test]
    fn listing_hides_dot_entries_and_sorts() {
        let session = RemoteSession::new(MapFs::default());
        session.write_whole("b", b"22").unwrap();
        session.write_whole("a", b"1").unwrap();
        let names: Vec<String> = session.list("").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(session.exists("a").unwrap());
        assert!(!session.exists("c").unwrap());
    }

    #[test]
    fn missing_objects_and_close() {
        let session = RemoteSession::new(MapFs::default());
        assert!(session.open_read("nope").err().unwrap().is_not_found());
        assert!(session.delete("nope").unwrap_err().is_not_found());
        session.write_whole("a", b"1").unwrap();
        session.rename("a", "b").unwrap();
        assert_eq!(read_all(&session, "b"), b"1");
        session.close().unwrap();
        assert!(session.with_client(|fs| fs.quit));
    }
}
