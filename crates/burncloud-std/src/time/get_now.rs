/// The instant type is associated so tests can substitute a manually
/// advanced clock for `std::time::Instant`.
pub trait GetNow {
    type Instant: Copy + Send + Sync + 'static;

    fn now(&self) -> Self::Instant;
}
