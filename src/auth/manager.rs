//! Session state container: owns the auth snapshot and every operation that
//! mutates it. Login, logout, refresh, and the secondary flows all terminate
//! their loading state on success and failure alike.

use super::snapshot::AuthSnapshot;
use crate::broadcast::{SessionBroadcast, SessionMessage};
use crate::errors::AuthError;
use crate::identity::{IdentityService, OtpKind, UserUpdate};
use crate::retry::{retry_if, RetryConfig};
use crate::session::{
    epoch_seconds, SessionEnvelope, SessionMetadata, SessionStore, UserProfile, ValidityConfig,
};
use secrecy::SecretString;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, instrument, warn};

/// Structured login result so callers can render inline errors without
/// catching anything.
#[derive(Clone, Debug, Default)]
pub struct LoginOutcome {
    pub success: bool,
    pub user: Option<UserProfile>,
    pub session: Option<SessionEnvelope>,
    pub error: Option<String>,
}

/// Result of a mandatory session check.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HealthStatus {
    /// Session live, snapshot in sync.
    Healthy,
    /// Session missing, expired, or unverifiable; callers fail closed.
    Lost,
}

fn user_message(err: &AuthError) -> String {
    match err {
        AuthError::Network(_) => {
            "A network problem interrupted the request. Please try again.".to_string()
        }
        other => other.to_string(),
    }
}

/// Process-wide session state container.
pub struct SessionManager<I> {
    identity: Arc<I>,
    store: Arc<SessionStore>,
    validity: ValidityConfig,
    retry: RetryConfig,
    broadcast: SessionBroadcast,
    snapshot: watch::Sender<AuthSnapshot>,
    /// Serializes concurrent refresh attempts and keeps the latest outcome
    /// for callers that joined mid-cycle; see [`Self::refresh_session`].
    refresh_lock: Mutex<Result<(), AuthError>>,
    refresh_generation: AtomicU64,
}

impl<I: IdentityService> SessionManager<I> {
    #[must_use]
    pub fn new(
        identity: Arc<I>,
        store: Arc<SessionStore>,
        validity: ValidityConfig,
        retry: RetryConfig,
        broadcast: SessionBroadcast,
    ) -> Arc<Self> {
        // Device id is minted on first construction and reused afterwards.
        let device_id = store.device_id();
        debug!(%device_id, "Session manager created");

        Arc::new(Self {
            identity,
            store,
            validity,
            retry,
            broadcast,
            snapshot: watch::channel(AuthSnapshot::default()).0,
            refresh_lock: Mutex::new(Ok(())),
            refresh_generation: AtomicU64::new(0),
        })
    }

    /// Current snapshot by value.
    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Observe every snapshot change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshot.subscribe()
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityConfig {
        &self.validity
    }

    /// Session-change notifications from the identity service.
    #[must_use]
    pub fn identity_events(&self) -> tokio::sync::broadcast::Receiver<crate::identity::IdentityEvent> {
        self.identity.subscribe_events()
    }

    /// Cross-tab channel this manager publishes on.
    #[must_use]
    pub fn broadcast_channel(&self) -> SessionBroadcast {
        self.broadcast.clone()
    }

    /// Device-scoped metadata for this tab.
    #[must_use]
    pub fn session_metadata(&self) -> SessionMetadata {
        let snapshot = self.snapshot();
        SessionMetadata {
            device_id: self.store.device_id(),
            last_active: snapshot.last_active,
            remember_me: snapshot.remember_me,
        }
    }

    fn update(&self, mutate: impl FnOnce(&mut AuthSnapshot)) {
        self.snapshot.send_modify(mutate);
    }

    fn set_loading(&self, loading: bool) {
        self.update(|snapshot| snapshot.is_loading = loading);
    }

    /// Bring the snapshot to an authenticated state around `session`.
    ///
    /// A failed profile fetch is recoverable: the profile is projected from
    /// the session claims and the error surfaced, since the session itself is
    /// still temporally valid. An unusable role claim is not recoverable; no
    /// policy decision may see it.
    async fn adopt_session(&self, session: SessionEnvelope, remember_me: bool, announce: bool) {
        let (profile, profile_error) = match self.identity.fetch_profile(&session.user).await {
            Ok(profile) => (Some(profile), None),
            Err(err) => {
                warn!("Profile fetch failed, projecting from session claims: {err}");
                match UserProfile::from_identity(&session.user) {
                    Ok(profile) => (Some(profile), Some(user_message(&err))),
                    Err(claim_err) => (None, Some(claim_err)),
                }
            }
        };

        let Some(profile) = profile else {
            error!("Session carries an unusable role claim; treating as unauthenticated");
            self.store.clear();
            self.update(|snapshot| {
                snapshot.reset_to_unauthenticated();
                snapshot.error = profile_error;
            });
            return;
        };

        let now = epoch_seconds();
        self.store.store(Some(&session));
        self.store.touch(now);
        if announce {
            self.broadcast
                .broadcast(SessionMessage::Updated(session.clone()));
        }

        self.update(|snapshot| {
            snapshot.user = Some(profile);
            snapshot.session = Some(session);
            snapshot.is_authenticated = true;
            snapshot.two_factor_required = false;
            snapshot.error = profile_error;
            snapshot.last_active = now;
            snapshot.remember_me = remember_me;
        });
    }

    /// First transition out of `uninitialized`: restore a persisted session,
    /// cross-check it with the identity service, and settle the snapshot.
    #[instrument(skip(self))]
    pub async fn initialize(&self) {
        self.update(|snapshot| {
            snapshot.is_loading = true;
            snapshot.error = None;
        });

        let last_active = self.store.last_active().unwrap_or_else(epoch_seconds);
        let remembered = self.store.get_stored().is_some();

        match self.identity.get_current_session().await {
            Ok(Some(session)) => {
                let now = epoch_seconds();
                if self.validity.is_valid(&session, last_active, now) {
                    self.adopt_session(session, remembered, false).await;
                } else {
                    debug!("Restored session failed validation, discarding");
                    self.store.clear();
                    self.update(AuthSnapshot::reset_to_unauthenticated);
                }
            }
            Ok(None) => {
                self.store.clear();
                self.update(AuthSnapshot::reset_to_unauthenticated);
            }
            Err(err) => {
                warn!("Session restore failed: {err}");
                self.store.clear();
                self.update(|snapshot| {
                    snapshot.reset_to_unauthenticated();
                    snapshot.error = Some(user_message(&err));
                });
            }
        }

        self.update(|snapshot| {
            snapshot.is_initialized = true;
            snapshot.is_loading = false;
        });
    }

    /// Sign in with credentials. Never returns an `Err`; failures land in the
    /// outcome and on the snapshot's error field.
    #[instrument(skip(self, password))]
    pub async fn login(
        &self,
        email: &str,
        password: &SecretString,
        remember_me: bool,
    ) -> LoginOutcome {
        // Defensive clear: a stale session must not survive a new login.
        if let Err(err) = self.identity.sign_out().await {
            debug!("Pre-login sign-out failed (ignored): {err}");
        }
        self.store.clear();

        self.update(|snapshot| {
            snapshot.is_loading = true;
            snapshot.error = None;
        });

        let outcome = match self.identity.sign_in_with_password(email, password).await {
            Ok(Some(session)) => {
                self.adopt_session(session, remember_me, true).await;
                let snapshot = self.snapshot();
                if snapshot.is_authenticated {
                    LoginOutcome {
                        success: true,
                        user: snapshot.user,
                        session: snapshot.session,
                        error: None,
                    }
                } else {
                    // Unusable role claim surfaced by adoption.
                    LoginOutcome {
                        error: snapshot.error,
                        ..LoginOutcome::default()
                    }
                }
            }
            Ok(None) => {
                let message = "Sign-in succeeded but no session was returned".to_string();
                self.update(|snapshot| {
                    snapshot.reset_to_unauthenticated();
                    snapshot.error = Some(message.clone());
                });
                LoginOutcome {
                    error: Some(message),
                    ..LoginOutcome::default()
                }
            }
            Err(err) => {
                let message = user_message(&err);
                let needs_second_factor = matches!(err, AuthError::TwoFactorRequired);
                self.update(|snapshot| {
                    snapshot.reset_to_unauthenticated();
                    snapshot.two_factor_required = needs_second_factor;
                    snapshot.error = Some(message.clone());
                });
                LoginOutcome {
                    error: Some(message),
                    ..LoginOutcome::default()
                }
            }
        };

        self.set_loading(false);
        outcome
    }

    /// Create an account. Does not authenticate; the verification flow runs
    /// first.
    ///
    /// # Errors
    /// Returns a user-facing message, with the "already exists" case
    /// translated by the identity client.
    #[instrument(skip(self, password, metadata))]
    pub async fn register(
        &self,
        email: &str,
        password: &SecretString,
        metadata: serde_json::Value,
    ) -> Result<(), String> {
        self.update(|snapshot| {
            snapshot.is_loading = true;
            snapshot.error = None;
        });

        let result = self
            .identity
            .sign_up(email, password, metadata)
            .await
            .map_err(|err| {
                let message = user_message(&err);
                self.update(|snapshot| snapshot.error = Some(message.clone()));
                message
            });

        self.set_loading(false);
        result
    }

    /// Sign out everywhere this tab can reach: identity service, persisted
    /// replicas, snapshot, sibling tabs. Idempotent and safe when already
    /// signed out.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Err(err) = self.identity.sign_out().await {
            warn!("Sign-out call failed (session cleared locally anyway): {err}");
        }
        self.store.clear();
        self.broadcast.broadcast(SessionMessage::Cleared);
        self.update(|snapshot| {
            snapshot.reset_to_unauthenticated();
            snapshot.is_loading = false;
            snapshot.error = None;
        });
    }

    /// Re-fetch the current session and refresh the snapshot around it.
    ///
    /// Concurrent calls do not race: a second caller waits for the first and
    /// then returns the first call's outcome without issuing a duplicate
    /// network call.
    ///
    /// # Errors
    /// Propagates identity-service failures; callers decide whether the
    /// cycle is fail-open (periodic refresh) or fail-closed (health check).
    #[instrument(skip(self))]
    pub async fn refresh_session(&self) -> Result<(), AuthError> {
        let generation = self.refresh_generation.load(Ordering::Acquire);
        let mut outcome = self.refresh_lock.lock().await;
        if self.refresh_generation.load(Ordering::Acquire) != generation {
            // Another refresh completed while we waited; share its outcome.
            return outcome.clone();
        }

        let result = match self.identity.get_current_session().await {
            Ok(Some(session)) => {
                self.adopt_session(session, self.snapshot().remember_me, true)
                    .await;
                Ok(())
            }
            Ok(None) => {
                debug!("Refresh found no session, transitioning to unauthenticated");
                self.store.clear();
                self.update(AuthSnapshot::reset_to_unauthenticated);
                Ok(())
            }
            Err(err) => Err(err),
        };

        *outcome = result.clone();
        self.refresh_generation.fetch_add(1, Ordering::Release);
        result
    }

    /// Mandatory session check: fail-closed on absence, expiry, or lookup
    /// failure; resynchronize when the service and the snapshot disagree.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthStatus {
        match self.identity.get_current_session().await {
            Ok(Some(session)) => {
                let now = epoch_seconds();
                if self.validity.is_expired(&session, now) {
                    warn!("Health check found an expired session");
                    return HealthStatus::Lost;
                }
                if !self.snapshot().is_authenticated {
                    debug!("Health check resynchronizing a live session");
                    self.adopt_session(session, self.snapshot().remember_me, false)
                        .await;
                }
                HealthStatus::Healthy
            }
            Ok(None) => HealthStatus::Lost,
            Err(err) => {
                warn!("Health check could not verify the session: {err}");
                HealthStatus::Lost
            }
        }
    }

    /// Local-only transition to signed-out: no service call, no broadcast.
    /// Used when a sibling tab already performed the logout, and by expiry
    /// enforcement.
    pub fn force_unauthenticated(&self, reason: Option<&str>) {
        self.store.clear();
        let reason = reason.map(ToString::to_string);
        self.update(|snapshot| {
            snapshot.reset_to_unauthenticated();
            snapshot.is_loading = false;
            snapshot.error = reason;
        });
    }

    /// Adopt a session announced by a sibling tab. Profile data is projected
    /// locally; the next health check reconciles with the service.
    pub fn adopt_announced(&self, session: SessionEnvelope) {
        match UserProfile::from_identity(&session.user) {
            Ok(profile) => {
                let now = epoch_seconds();
                self.store.touch(now);
                self.update(|snapshot| {
                    snapshot.user = Some(profile);
                    snapshot.session = Some(session);
                    snapshot.is_authenticated = true;
                    snapshot.last_active = now;
                });
            }
            Err(err) => warn!("Ignoring announced session with bad role claim: {err}"),
        }
    }

    /// Request a password reset email.
    ///
    /// # Errors
    /// Returns a user-facing message.
    #[instrument(skip(self))]
    pub async fn reset_password(&self, email: &str) -> Result<(), String> {
        self.simple_operation(|identity| {
            let email = email.to_string();
            async move { identity.reset_password_for_email(&email).await }
        })
        .await
    }

    /// Change the password of the signed-in user.
    ///
    /// # Errors
    /// Returns a user-facing message.
    #[instrument(skip(self, new_password))]
    pub async fn update_password(&self, new_password: SecretString) -> Result<(), String> {
        self.simple_operation(|identity| {
            let update = UserUpdate {
                password: Some(new_password.clone()),
                ..UserUpdate::default()
            };
            async move { identity.update_user(update).await.map(|_| ()) }
        })
        .await
    }

    /// Update profile fields and refresh the local projection.
    ///
    /// # Errors
    /// Returns a user-facing message.
    #[instrument(skip(self, fields))]
    pub async fn update_profile(&self, fields: serde_json::Value) -> Result<(), String> {
        let result = self
            .simple_operation(|identity| {
                let update = UserUpdate {
                    data: Some(fields.clone()),
                    ..UserUpdate::default()
                };
                async move { identity.update_user(update).await }
            })
            .await;

        match result {
            Ok(identity) => {
                if let Ok(profile) = self.identity.fetch_profile(&identity).await {
                    self.update(|snapshot| snapshot.user = Some(profile));
                }
                Ok(())
            }
            Err(message) => Err(message),
        }
    }

    /// Verify an email one-time code.
    ///
    /// # Errors
    /// Returns a user-facing message.
    #[instrument(skip(self, token))]
    pub async fn verify_email(&self, token: &str) -> Result<(), String> {
        let session = self
            .simple_operation(|identity| {
                let token = token.to_string();
                async move {
                    identity
                        .verify_one_time_code(&token, OtpKind::EmailVerification)
                        .await
                }
            })
            .await?;

        if let Some(session) = session {
            self.adopt_session(session, false, true).await;
        }
        Ok(())
    }

    /// Verify the second factor after a login that required one.
    ///
    /// # Errors
    /// Returns a user-facing message.
    #[instrument(skip(self, code))]
    pub async fn verify_2fa(&self, code: &str) -> Result<(), String> {
        let session = self
            .simple_operation(|identity| {
                let code = code.to_string();
                async move { identity.verify_one_time_code(&code, OtpKind::TwoFactor).await }
            })
            .await?;

        match session {
            Some(session) => {
                self.adopt_session(session, self.snapshot().remember_me, true)
                    .await;
                Ok(())
            }
            None => {
                self.update(|snapshot| snapshot.two_factor_required = false);
                Ok(())
            }
        }
    }

    /// Shared skeleton for the secondary flows: loading flag, bounded retry
    /// of transient failures only, error surfacing. The loading flag
    /// terminates on every path.
    async fn simple_operation<T, F, Fut>(&self, mut op: F) -> Result<T, String>
    where
        F: FnMut(Arc<I>) -> Fut,
        Fut: std::future::Future<Output = Result<T, AuthError>>,
    {
        self.update(|snapshot| {
            snapshot.is_loading = true;
            snapshot.error = None;
        });

        let identity = self.identity.clone();
        let result = retry_if(self.retry, || op(identity.clone()), AuthError::retryable).await;

        let result = result.map_err(|err| {
            let message = user_message(&err);
            self.update(|snapshot| snapshot.error = Some(message.clone()));
            message
        });

        self.set_loading(false);
        result
    }
}
