//! Deadlines for multi-step blocking operations.

use std::time::{Duration, Instant};

/// A deadline tracker for operations with multiple waits.
///
/// An unbounded deadline never expires and reports no remaining time limit.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    /// The deadline instant, `None` when unbounded.
    at: Option<Instant>,
    /// The duration the deadline was created with.
    budget: Option<Duration>,
}

impl Deadline {
    /// Create a new deadline from now.
    #[must_use]
    pub fn from_now(duration: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(duration),
            budget: Some(duration),
        }
    }

    /// A deadline that never expires.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            at: None,
            budget: None,
        }
    }

    /// Create from an optional limit.
    #[must_use]
    pub fn new(limit: Option<Duration>) -> Self {
        limit.map_or_else(Self::unbounded, Self::from_now)
    }

    /// Check if the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Remaining time, or `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// The duration the deadline was created with.
    #[must_use]
    pub const fn budget(&self) -> Option<Duration> {
        self.budget
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_remaining() {
        let deadline = Deadline::from_now(Duration::from_secs(10));
        assert!(!deadline.is_expired());
        assert!(deadline.remaining().unwrap() > Duration::from_secs(9));
        assert_eq!(deadline.budget(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn zero_deadline_expires() {
        let deadline = Deadline::from_now(Duration::ZERO);
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn unbounded_never_expires() {
        let deadline = Deadline::new(None);
        assert!(!deadline.is_expired());
        assert!(deadline.remaining().is_none());
        assert!(deadline.budget().is_none());
    }
}
