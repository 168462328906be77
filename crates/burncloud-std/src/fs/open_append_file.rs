use std::io;
use std::path::Path;

/// Open (creating if needed) a file for appending.
///
/// The writer is moved onto a dedicated writer task, hence `Send + 'static`.
pub trait OpenAppendFile {
    type Writer: io::Write + Send + 'static;

    fn open_append(&self, path: &Path) -> io::Result<Self::Writer>;
}
