//! Shared doubles for container and guard tests.

use crate::errors::AuthError;
use crate::identity::{IdentityEvent, IdentityService, OtpKind, UserUpdate};
use crate::session::{epoch_seconds, SessionEnvelope, UserIdentity, UserProfile};
use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::time::Duration;
use uuid::Uuid;

pub(crate) fn session(expires_in: i64, role: &str) -> SessionEnvelope {
    SessionEnvelope {
        access_token: "token".to_string(),
        refresh_token: None,
        expires_at: epoch_seconds() + expires_in,
        user: UserIdentity {
            id: Uuid::new_v4(),
            email: "kai@example.org".to_string(),
            role: role.to_string(),
            display_name: Some("Kai".to_string()),
        },
    }
}

/// Programmable identity double.
pub(crate) struct FakeIdentity {
    pub(crate) current: Mutex<Option<SessionEnvelope>>,
    pub(crate) sign_in: Mutex<Result<Option<SessionEnvelope>, AuthError>>,
    pub(crate) profile_fails: AtomicBool,
    pub(crate) session_fails: AtomicBool,
    pub(crate) update_error: Mutex<AuthError>,
    pub(crate) session_calls: AtomicU32,
    pub(crate) sign_out_calls: AtomicU32,
    pub(crate) update_calls: AtomicU32,
    pub(crate) session_delay: Option<Duration>,
    pub(crate) events: broadcast::Sender<IdentityEvent>,
}

impl Default for FakeIdentity {
    fn default() -> Self {
        Self {
            current: Mutex::new(None),
            sign_in: Mutex::new(Ok(None)),
            profile_fails: AtomicBool::new(false),
            session_fails: AtomicBool::new(false),
            update_error: Mutex::new(AuthError::Session("not under test".to_string())),
            session_calls: AtomicU32::new(0),
            sign_out_calls: AtomicU32::new(0),
            update_calls: AtomicU32::new(0),
            session_delay: None,
            events: broadcast::channel(8).0,
        }
    }
}

impl FakeIdentity {
    pub(crate) fn with_current(self, session: SessionEnvelope) -> Self {
        *self.current.lock().unwrap() = Some(session);
        self
    }

    pub(crate) fn with_sign_in(
        self,
        result: Result<Option<SessionEnvelope>, AuthError>,
    ) -> Self {
        *self.sign_in.lock().unwrap() = result;
        self
    }

    pub(crate) fn with_session_delay(mut self, delay: Duration) -> Self {
        self.session_delay = Some(delay);
        self
    }

    pub(crate) fn with_session_failure(self) -> Self {
        self.session_fails.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn with_update_error(self, error: AuthError) -> Self {
        *self.update_error.lock().unwrap() = error;
        self
    }

    pub(crate) fn emit(&self, event: IdentityEvent) {
        let _ = self.events.send(event);
    }
}

impl IdentityService for FakeIdentity {
    async fn get_current_session(&self) -> Result<Option<SessionEnvelope>, AuthError> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.session_delay {
            tokio::time::sleep(delay).await;
        }
        if self.session_fails.load(Ordering::SeqCst) {
            return Err(AuthError::Network("session service down".to_string()));
        }
        Ok(self.current.lock().unwrap().clone())
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &SecretString,
    ) -> Result<Option<SessionEnvelope>, AuthError> {
        let result = std::mem::replace(&mut *self.sign_in.lock().unwrap(), Ok(None));
        if let Ok(Some(session)) = &result {
            *self.current.lock().unwrap() = Some(session.clone());
        }
        result
    }

    async fn sign_up(
        &self,
        _email: &str,
        _password: &SecretString,
        _metadata: serde_json::Value,
    ) -> Result<(), AuthError> {
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *self.current.lock().unwrap() = None;
        Ok(())
    }

    async fn reset_password_for_email(&self, _email: &str) -> Result<(), AuthError> {
        Ok(())
    }

    async fn update_user(&self, _update: UserUpdate) -> Result<UserIdentity, AuthError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        Err(self.update_error.lock().unwrap().clone())
    }

    async fn verify_one_time_code(
        &self,
        _token: &str,
        _kind: OtpKind,
    ) -> Result<Option<SessionEnvelope>, AuthError> {
        Ok(None)
    }

    async fn fetch_profile(&self, identity: &UserIdentity) -> Result<UserProfile, AuthError> {
        if self.profile_fails.load(Ordering::SeqCst) {
            return Err(AuthError::Network("profile service down".to_string()));
        }
        UserProfile::from_identity(identity).map_err(AuthError::Session)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}

/// Navigator double recording every redirect.
#[derive(Default)]
pub(crate) struct RecordingNavigator {
    pub(crate) redirects: Mutex<Vec<String>>,
    pub(crate) replacements: Mutex<Vec<String>>,
}

impl super::guard::Navigator for RecordingNavigator {
    fn redirect(&self, to: &str) {
        self.redirects.lock().unwrap().push(to.to_string());
    }

    fn replace(&self, to: &str) {
        self.replacements.lock().unwrap().push(to.to_string());
    }
}
