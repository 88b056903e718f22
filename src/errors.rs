//! Typed failure taxonomy for the auth domain.
//!
//! Wiring code keeps using `anyhow`; everything that needs to make a policy
//! decision (retry eligibility, user-facing message, HTTP status mapping)
//! goes through [`AuthError`].

use thiserror::Error;

/// Failure categories for session acquisition, refresh, and the auth flows.
#[derive(Clone, Debug, Error)]
pub enum AuthError {
    /// Transport-level failure talking to the identity service.
    #[error("network error: {0}")]
    Network(String),

    /// The identity service rejected the current session.
    #[error("session error: {0}")]
    Session(String),

    /// The identity service throttled the request.
    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("email address has not been verified")]
    EmailNotVerified,

    #[error("two-factor verification required")]
    TwoFactorRequired,

    /// Request rejected by CSRF protection.
    #[error("request could not be validated")]
    Csrf,

    #[error("session has expired")]
    SessionExpired,

    /// Session invalidated by a newer login elsewhere.
    #[error("session superseded by a newer login")]
    ConcurrentSession,
}

impl AuthError {
    /// Stable machine-readable code for logs and clients.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Session(_) => "session_error",
            Self::RateLimit(_) => "rate_limit",
            Self::InvalidCredentials => "invalid_credentials",
            Self::EmailNotVerified => "email_not_verified",
            Self::TwoFactorRequired => "two_factor_required",
            Self::Csrf => "csrf_error",
            Self::SessionExpired => "session_expired",
            Self::ConcurrentSession => "concurrent_session",
        }
    }

    /// HTTP-like status, when one applies.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Network(_) => None,
            Self::RateLimit(_) => Some(429),
            Self::Session(_)
            | Self::InvalidCredentials
            | Self::SessionExpired
            | Self::ConcurrentSession => Some(401),
            Self::EmailNotVerified | Self::TwoFactorRequired | Self::Csrf => Some(403),
        }
    }

    /// Whether a caller may retry the failed operation automatically.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimit(_))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        match err.status().map(|status| status.as_u16()) {
            Some(429) => Self::RateLimit(err.to_string()),
            Some(401) => Self::Session(err.to_string()),
            Some(403) => Self::Csrf,
            _ => Self::Network(err.to_string()),
        }
    }
}

/// Downcast an opaque error chain to the auth taxonomy, if it came from it.
#[must_use]
pub fn as_auth_error(err: &anyhow::Error) -> Option<&AuthError> {
    err.downcast_ref::<AuthError>()
}

/// Whether an opaque error is a retryable auth failure.
///
/// Errors outside the taxonomy are never retryable; only classified
/// transient failures qualify.
#[must_use]
pub fn is_retryable(err: &anyhow::Error) -> bool {
    as_auth_error(err).is_some_and(AuthError::retryable)
}

#[cfg(test)]
mod tests {
    use super::{as_auth_error, is_retryable, AuthError};

    #[test]
    fn codes_statuses_and_retry_flags() {
        let cases: &[(AuthError, &str, Option<u16>, bool)] = &[
            (AuthError::Network("refused".into()), "network_error", None, true),
            (AuthError::Session("stale".into()), "session_error", Some(401), false),
            (AuthError::RateLimit("slow down".into()), "rate_limit", Some(429), true),
            (AuthError::InvalidCredentials, "invalid_credentials", Some(401), false),
            (AuthError::EmailNotVerified, "email_not_verified", Some(403), false),
            (AuthError::TwoFactorRequired, "two_factor_required", Some(403), false),
            (AuthError::Csrf, "csrf_error", Some(403), false),
            (AuthError::SessionExpired, "session_expired", Some(401), false),
            (AuthError::ConcurrentSession, "concurrent_session", Some(401), false),
        ];

        for (err, code, status, retryable) in cases {
            assert_eq!(err.code(), *code);
            assert_eq!(err.status(), *status);
            assert_eq!(err.retryable(), *retryable);
        }
    }

    #[test]
    fn classifies_anyhow_chains() {
        let err = anyhow::Error::new(AuthError::RateLimit("burst".into()));
        assert!(is_retryable(&err));
        assert_eq!(as_auth_error(&err).map(AuthError::code), Some("rate_limit"));

        let err = anyhow::Error::new(AuthError::InvalidCredentials);
        assert!(!is_retryable(&err));

        let err = anyhow::anyhow!("not an auth failure");
        assert!(as_auth_error(&err).is_none());
        assert!(!is_retryable(&err));
    }
}
