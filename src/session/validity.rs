//! Validity and refresh predicates for stored sessions.

use super::envelope::SessionEnvelope;

const DEFAULT_EXPIRY_BUFFER_SECONDS: i64 = 15 * 60;
const DEFAULT_INACTIVITY_WINDOW_SECONDS: i64 = 30 * 60;
const DEFAULT_REFRESH_THRESHOLD_SECONDS: i64 = 5 * 60;

/// Session validity tuning.
#[derive(Clone, Copy, Debug)]
pub struct ValidityConfig {
    expiry_buffer_seconds: i64,
    inactivity_window_seconds: i64,
    refresh_threshold_seconds: i64,
}

impl Default for ValidityConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_seconds: DEFAULT_EXPIRY_BUFFER_SECONDS,
            inactivity_window_seconds: DEFAULT_INACTIVITY_WINDOW_SECONDS,
            refresh_threshold_seconds: DEFAULT_REFRESH_THRESHOLD_SECONDS,
        }
    }
}

impl ValidityConfig {
    #[must_use]
    pub fn with_expiry_buffer_seconds(mut self, seconds: i64) -> Self {
        self.expiry_buffer_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_inactivity_window_seconds(mut self, seconds: i64) -> Self {
        self.inactivity_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_threshold_seconds(mut self, seconds: i64) -> Self {
        self.refresh_threshold_seconds = seconds;
        self
    }

    #[must_use]
    pub fn expiry_buffer_seconds(&self) -> i64 {
        self.expiry_buffer_seconds
    }

    /// A session is valid only when the expiry is more than the buffer in the
    /// future and the last activity is inside the inactivity window. Either
    /// violation alone invalidates it.
    #[must_use]
    pub fn is_valid(&self, session: &SessionEnvelope, last_active: i64, now: i64) -> bool {
        let expiry_ok = session.remaining_seconds(now) > self.expiry_buffer_seconds;
        let activity_ok = now - last_active <= self.inactivity_window_seconds;
        expiry_ok && activity_ok
    }

    /// Whether the session should be proactively refreshed. Independent of
    /// the invalidity buffer.
    #[must_use]
    pub fn should_refresh(&self, session: &SessionEnvelope, now: i64) -> bool {
        session.remaining_seconds(now) < self.refresh_threshold_seconds
    }

    /// Expired outright, without the buffer. Used by fail-closed checks that
    /// must not treat a buffered-but-live session as dead.
    #[must_use]
    pub fn is_expired(&self, session: &SessionEnvelope, now: i64) -> bool {
        session.remaining_seconds(now) <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::ValidityConfig;
    use crate::session::envelope::{SessionEnvelope, UserIdentity};
    use uuid::Uuid;

    const NOW: i64 = 1_700_000_000;

    fn session(expires_in: i64) -> SessionEnvelope {
        SessionEnvelope {
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: NOW + expires_in,
            user: UserIdentity {
                id: Uuid::new_v4(),
                email: "kai@example.org".to_string(),
                role: "participant".to_string(),
                display_name: None,
            },
        }
    }

    #[test]
    fn valid_needs_both_future_expiry_and_recent_activity() {
        let config = ValidityConfig::default();

        // Expiry comfortably beyond the 15 minute buffer, active now.
        assert!(config.is_valid(&session(60 * 60), NOW, NOW));
        // Expiry inside the buffer, still active.
        assert!(!config.is_valid(&session(10 * 60), NOW, NOW));
        // Future expiry but idle past the 30 minute window.
        assert!(!config.is_valid(&session(60 * 60), NOW - 31 * 60, NOW));
        // Both violated.
        assert!(!config.is_valid(&session(-60 * 60), NOW - 31 * 60, NOW));
        // Idle exactly at the window edge still counts as active.
        assert!(config.is_valid(&session(60 * 60), NOW - 30 * 60, NOW));
    }

    #[test]
    fn refresh_threshold_is_independent_of_the_buffer() {
        let config = ValidityConfig::default();

        assert!(config.should_refresh(&session(4 * 60), NOW));
        assert!(!config.should_refresh(&session(6 * 60), NOW));
        // Inside the validity buffer but above the refresh threshold.
        let ten_minutes = session(10 * 60);
        assert!(!config.is_valid(&ten_minutes, NOW, NOW));
        assert!(!config.should_refresh(&ten_minutes, NOW));
    }

    #[test]
    fn expired_ignores_the_buffer() {
        let config = ValidityConfig::default();
        assert!(!config.is_expired(&session(10 * 60), NOW));
        assert!(config.is_expired(&session(0), NOW));
        assert!(config.is_expired(&session(-1), NOW));
    }

    #[test]
    fn overrides_apply() {
        let config = ValidityConfig::default()
            .with_expiry_buffer_seconds(0)
            .with_inactivity_window_seconds(5)
            .with_refresh_threshold_seconds(30);

        assert!(config.is_valid(&session(60), NOW, NOW));
        assert!(!config.is_valid(&session(60), NOW - 6, NOW));
        assert!(config.should_refresh(&session(29), NOW));
    }
}
