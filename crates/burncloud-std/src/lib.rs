//! Thin seams over `std` used by the BurnCloud proxy.
//!
//! | Concern | Trait(s) | Production | Test |
//! |---------|----------|------------|------|
//! | Env vars | [`ReadEnv`] | [`SystemEnv`] | [`InMemoryEnv`]* |
//! | Filesystem | [`ReadFile`], [`OpenAppendFile`] | [`SystemFs`] | [`MemFs`]* |
//! | Time | [`GetNow`], [`GetElapsed`] | [`SystemClock`] | [`MockClock`]* |
//!
//! *Available with `#[cfg(test)]` or the `"test-support"` feature.
//!
//! Every test double here is `Send + Sync`: the proxy shares clocks and
//! append writers across tokio worker threads, so `RefCell` backings are not
//! an option.

pub mod env;
pub mod fs;
pub mod time;

pub use env::{ReadEnv, SystemEnv};
pub use fs::{OpenAppendFile, ReadFile, SystemFs};
pub use time::{GetElapsed, GetNow, SystemClock};

#[cfg(any(test, feature = "test-support"))]
pub use env::InMemoryEnv;
#[cfg(any(test, feature = "test-support"))]
pub use fs::{MemAppendWriter, MemFs};
#[cfg(any(test, feature = "test-support"))]
pub use time::{MockClock, MockInstant};
