#[cfg(any(test, feature = "test-support"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "test-support"))]
use std::io;
#[cfg(any(test, feature = "test-support"))]
use std::path::{Path, PathBuf};
#[cfg(any(test, feature = "test-support"))]
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(any(test, feature = "test-support"))]
use super::{OpenAppendFile, ReadFile};

#[cfg(any(test, feature = "test-support"))]
type Files = Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>;

/// In-memory filesystem. Clones share the same files.
///
/// Paths are compared verbatim, with no normalization: `"a.log"` and
/// `"./a.log"` are different files.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct MemFs {
    files: Files,
}

/// Append handle returned by [`MemFs::open_append`]. Each `write` call
/// lands atomically under the filesystem lock.
#[cfg(any(test, feature = "test-support"))]
pub struct MemAppendWriter {
    path: PathBuf,
    files: Files,
}

#[cfg(any(test, feature = "test-support"))]
impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.as_ref().to_path_buf(), content.into());
    }

    /// Current contents of `path` as UTF-8, if the file exists.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path.as_ref())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}

#[cfg(any(test, feature = "test-support"))]
impl ReadFile for MemFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let bytes = files
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))?;
        String::from_utf8(bytes.clone()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

#[cfg(any(test, feature = "test-support"))]
impl OpenAppendFile for MemFs {
    type Writer = MemAppendWriter;

    fn open_append(&self, path: &Path) -> io::Result<MemAppendWriter> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_path_buf())
            .or_default();
        Ok(MemAppendWriter {
            path: path.to_path_buf(),
            files: Arc::clone(&self.files),
        })
    }
}

#[cfg(any(test, feature = "test-support"))]
impl io::Write for MemAppendWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
