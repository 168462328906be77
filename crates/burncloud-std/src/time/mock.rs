#[cfg(any(test, feature = "test-support"))]
use std::sync::{Arc, Mutex, PoisonError};
#[cfg(any(test, feature = "test-support"))]
use std::time::Duration;

#[cfg(any(test, feature = "test-support"))]
use super::{GetElapsed, GetNow};

/// Clock that only moves when told to. Clones share the same time, so a test
/// can keep one handle and give another to the code under test.
///
/// ```ignore
/// let clock = MockClock::new();
/// let issued_at = clock.now();
/// clock.advance(Duration::from_secs(3300));
/// assert_eq!(clock.elapsed(issued_at), Duration::from_secs(3300));
/// ```
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone, Default)]
pub struct MockClock {
    current: Arc<Mutex<Duration>>,
}

/// Offset from the mock clock's epoch.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MockInstant(pub Duration);

#[cfg(any(test, feature = "test-support"))]
impl MockClock {
    /// Starts at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }

    pub fn set(&self, at: Duration) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn current_time(&self) -> Duration {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(any(test, feature = "test-support"))]
impl GetNow for MockClock {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        MockInstant(self.current_time())
    }
}

#[cfg(any(test, feature = "test-support"))]
impl GetElapsed for MockClock {
    fn elapsed(&self, since: MockInstant) -> Duration {
        self.current_time().saturating_sub(since.0)
    }
}
