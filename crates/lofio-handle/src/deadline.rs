//! Wall-clock bounds for identity re-verification retry loops.

use std::time::{Duration, Instant};

/// A wall-clock limit on how long an inode re-verification loop may keep
/// retrying.
///
/// The deadline bounds the retry loop only: an individual syscall already
/// in flight may run past it. A deadline never interrupts anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    limit: Option<Duration>,
}

impl Deadline {
    /// Expires the given duration after the operation begins.
    pub fn after(limit: Duration) -> Self {
        Self { limit: Some(limit) }
    }

    /// Never expires.
    pub fn infinite() -> Self {
        Self { limit: None }
    }

    /// True if this deadline never expires.
    pub fn is_infinite(&self) -> bool {
        self.limit.is_none()
    }

    /// The configured limit, if any.
    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// True once `start` is further in the past than the limit.
    pub fn expired_since(&self, start: Instant) -> bool {
        match self.limit {
            None => false,
            Some(limit) => start.elapsed() >= limit,
        }
    }
}

impl Default for Deadline {
    /// Thirty seconds, which comfortably outlasts any plausible burst of
    /// competing renames.
    fn default() -> Self {
        Self::after(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infinite_never_expires() {
        let d = Deadline::infinite();
        assert!(d.is_infinite());
        let long_ago = Instant::now() - Duration::from_secs(3600);
        assert!(!d.expired_since(long_ago));
    }

    #[test]
    fn test_zero_deadline_expires_immediately() {
        let d = Deadline::after(Duration::ZERO);
        assert!(d.expired_since(Instant::now()));
    }

    #[test]
    fn test_future_deadline_not_expired() {
        let d = Deadline::after(Duration::from_secs(60));
        assert!(!d.expired_since(Instant::now()));
        assert_eq!(d.limit(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_elapsed_deadline_expired() {
        let d = Deadline::after(Duration::from_millis(1));
        let start = Instant::now() - Duration::from_millis(5);
        assert!(d.expired_since(start));
    }

    #[test]
    fn test_default_is_thirty_seconds() {
        assert_eq!(Deadline::default().limit(), Some(Duration::from_secs(30)));
    }
}
