//! Monotonic time.
//!
//! ```
//! use burncloud_std::time::{GetElapsed, GetNow, SystemClock};
//! use std::time::Duration;
//!
//! fn needs_refresh<C: GetElapsed>(clock: &C, issued_at: C::Instant, lifetime: Duration) -> bool {
//!     clock.elapsed(issued_at) >= lifetime
//! }
//!
//! let clock = SystemClock;
//! let issued_at = clock.now();
//! assert!(!needs_refresh(&clock, issued_at, Duration::from_secs(3600)));
//! ```

mod get_elapsed;
mod get_now;
mod mock;
mod system;

pub use get_elapsed::GetElapsed;
pub use get_now::GetNow;
#[cfg(any(test, feature = "test-support"))]
pub use mock::{MockClock, MockInstant};
pub use system::SystemClock;
