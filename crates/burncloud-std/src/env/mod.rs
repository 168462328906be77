//! Environment variable access.
//!
//! ```
//! use burncloud_std::env::{ReadEnv, SystemEnv};
//!
//! fn region<E: ReadEnv>(env: &E) -> String {
//!     env.var("GCP_REGION").unwrap_or_else(|_| "us-central1".to_string())
//! }
//!
//! let _ = region(&SystemEnv);
//! ```

mod in_memory;
mod read_env;
mod system;

#[cfg(any(test, feature = "test-support"))]
pub use in_memory::InMemoryEnv;
pub use read_env::ReadEnv;
pub use system::SystemEnv;
