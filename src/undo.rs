use chrono::{DateTime, Duration, Utc};

/// Grace period after an unsubscribe during which it can be reversed.
pub const UNDO_WINDOW_SECONDS: i64 = 10;

/// The undo grace window opened when an unsubscribe completes.
///
/// Implemented as an expiry instant compared against a caller-supplied
/// `now` rather than a background countdown task, so there is nothing to
/// cancel on teardown and re-entering the window simply replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoWindow {
    expires_at: DateTime<Utc>,
    removed_identifier: Option<String>,
}

impl UndoWindow {
    pub fn start(now: DateTime<Utc>, removed_identifier: Option<String>) -> Self {
        UndoWindow {
            expires_at: now + Duration::seconds(UNDO_WINDOW_SECONDS),
            removed_identifier,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// External identifier of the removed subscription, if it had one.
    pub fn removed_identifier(&self) -> Option<&str> {
        self.removed_identifier.as_deref()
    }

    /// Whole seconds left before the undo option disappears, clamped at 0.
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        "2025-06-01T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn starts_exactly_ten_seconds_out() {
        let window = UndoWindow::start(t0(), None);
        assert_eq!(window.expires_at(), t0() + Duration::seconds(10));
        assert_eq!(window.seconds_remaining(t0()), 10);
    }

    #[test]
    fn counts_down_monotonically_to_zero() {
        let window = UndoWindow::start(t0(), None);
        assert_eq!(window.seconds_remaining(t0() + Duration::seconds(3)), 7);
        assert_eq!(window.seconds_remaining(t0() + Duration::seconds(10)), 0);
        assert_eq!(window.seconds_remaining(t0() + Duration::seconds(60)), 0);
    }

    #[test]
    fn expires_at_the_boundary_not_before() {
        let window = UndoWindow::start(t0(), None);
        assert!(!window.is_expired(t0() + Duration::seconds(9)));
        assert!(window.is_expired(t0() + Duration::seconds(10)));
    }

    #[test]
    fn restarting_replaces_the_window() {
        let first = UndoWindow::start(t0(), Some("user:1".to_string()));
        let second = UndoWindow::start(t0() + Duration::seconds(8), Some("user:1".to_string()));
        // The old window would be expired here; the replacement is not.
        let later = t0() + Duration::seconds(12);
        assert!(first.is_expired(later));
        assert!(!second.is_expired(later));
    }

    #[test]
    fn keeps_the_removed_identifier() {
        let window = UndoWindow::start(t0(), Some("user:42".to_string()));
        assert_eq!(window.removed_identifier(), Some("user:42"));
        assert_eq!(UndoWindow::start(t0(), None).removed_identifier(), None);
    }
}
