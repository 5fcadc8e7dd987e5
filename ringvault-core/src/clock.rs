use chrono::Utc;

/// Narrow contract for the header's creation timestamp, so tests can pin
/// down a fixed value instead of depending on wall-clock time.
pub trait Clock {
    fn unix_time(&self) -> i64;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_time(&self) -> i64 {
        Utc::now().timestamp()
    }
}

#[derive(Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn unix_time(&self) -> i64 {
        self.0
    }
}
