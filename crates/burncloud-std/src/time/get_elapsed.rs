use std::time::Duration;

use super::GetNow;

pub trait GetElapsed: GetNow {
    /// Time since `since`, saturating at zero.
    fn elapsed(&self, since: Self::Instant) -> Duration;
}
