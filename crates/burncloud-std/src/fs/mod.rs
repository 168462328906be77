//! Filesystem access: whole-file reads for key material and append-only
//! writers for the audit log.
//!
//! ```ignore
//! use burncloud_std::fs::{MemFs, OpenAppendFile, ReadFile};
//! use std::io::Write;
//! use std::path::Path;
//!
//! let fs = MemFs::new();
//! let mut log = fs.open_append(Path::new("audit.log")).unwrap();
//! log.write_all(b"{\"outcome\":\"forwarded\"}\n").unwrap();
//! assert!(fs.read_to_string(Path::new("audit.log")).unwrap().ends_with('\n'));
//! ```

mod mem;
mod open_append_file;
mod read_file;
mod system;

#[cfg(any(test, feature = "test-support"))]
pub use mem::{MemAppendWriter, MemFs};
pub use open_append_file::OpenAppendFile;
pub use read_file::ReadFile;
pub use system::SystemFs;
