use std::time::{Duration, Instant};

/// Matches the source's convention for blocking-call timeouts: negative is
/// infinite, zero is a single non-blocking attempt, positive is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Infinite,
    Try,
    Millis(u64),
}

impl Timeout {
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            i64::MIN..=-1 => Timeout::Infinite,
            0 => Timeout::Try,
            ms => Timeout::Millis(ms as u64),
        }
    }

    pub(crate) fn deadline(self) -> Option<Instant> {
        match self {
            Timeout::Infinite => None,
            Timeout::Try => Some(Instant::now()),
            Timeout::Millis(ms) => Some(Instant::now() + Duration::from_millis(ms)),
        }
    }
}
