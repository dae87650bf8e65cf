//! Revision numbers and the revision clock
//!
//! Every dirtying operation advances a [`RevisionClock`]. Tags report the
//! revision at which they last changed, so "is this snapshot still valid"
//! reduces to comparing two integers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Revision number for tracking freshness
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub u64);

impl Revision {
    /// Never observed; used for "not rendered yet" snapshots
    pub const ZERO: Revision = Revision(0);

    /// The clock's starting value and the value of constant tags
    pub const INITIAL: Revision = Revision(1);

    /// Newer than anything; a tag reporting it never validates
    pub const VOLATILE: Revision = Revision(u64::MAX);

    pub fn next(self) -> Revision {
        Revision(self.0.saturating_add(1))
    }

    pub fn is_volatile(self) -> bool {
        self == Revision::VOLATILE
    }
}

impl Default for Revision {
    fn default() -> Self {
        Revision::ZERO
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_volatile() {
            write!(f, "r∞")
        } else {
            write!(f, "r{}", self.0)
        }
    }
}

/// Monotonic revision counter shared by every tag of one runtime
///
/// The clock is an explicit object rather than ambient global state so that
/// independent runtimes (and tests) never observe each other's mutations.
#[derive(Debug)]
pub struct RevisionClock {
    current: AtomicU64,
}

impl RevisionClock {
    /// Create a new clock at [`Revision::INITIAL`]
    pub fn new() -> Self {
        RevisionClock {
            current: AtomicU64::new(Revision::INITIAL.0),
        }
    }

    /// Create a new shared clock
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Current revision
    pub fn value(&self) -> Revision {
        Revision(self.current.load(Ordering::SeqCst))
    }

    /// Check whether nothing was dirtied since `ticket` was taken
    pub fn validate(&self, ticket: Revision) -> bool {
        self.value() == ticket
    }

    /// Advance the clock by one and return the new revision
    pub fn bump(&self) -> Revision {
        let next = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(revision = next, "revision clock advanced");
        Revision(next)
    }
}

impl Default for RevisionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_ordering() {
        let r1 = Revision(1);
        let r2 = Revision(2);

        assert!(r1 < r2);
        assert_eq!(r1.next(), r2);
        assert!(Revision::VOLATILE > r2);
        assert_eq!(Revision::VOLATILE.next(), Revision::VOLATILE);
    }

    #[test]
    fn test_clock_starts_at_initial() {
        let clock = RevisionClock::new();
        assert_eq!(clock.value(), Revision::INITIAL);
        assert!(clock.validate(Revision::INITIAL));
    }

    #[test]
    fn test_bump_invalidates_old_tickets() {
        let clock = RevisionClock::new();
        let ticket = clock.value();

        assert_eq!(clock.bump(), Revision(2));
        assert!(!clock.validate(ticket));
        assert!(clock.validate(Revision(2)));
    }

    #[test]
    fn test_independent_clocks() {
        let a = RevisionClock::new();
        let b = RevisionClock::new();

        a.bump();
        a.bump();
        assert_eq!(a.value(), Revision(3));
        assert_eq!(b.value(), Revision::INITIAL);
    }

    #[test]
    fn test_display() {
        assert_eq!(Revision(4).to_string(), "r4");
        assert_eq!(Revision::VOLATILE.to_string(), "r∞");
    }
}
