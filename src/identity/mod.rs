//! Boundary to the external identity service.
//!
//! The protocol behind these traits is opaque; the crate only trusts the
//! fields of the returned [`SessionEnvelope`]. Token issuance, password
//! hashing, and MFA secret handling all stay on the other side.

pub mod http;

use crate::errors::AuthError;
use crate::session::{SessionEnvelope, UserIdentity, UserProfile};
use secrecy::SecretString;
use std::future::Future;
use tokio::sync::broadcast;

/// Session lifecycle notifications emitted by the identity service.
#[derive(Clone, Debug)]
pub enum IdentityEvent {
    SignedIn(SessionEnvelope),
    SignedOut,
    TokenRefreshed(SessionEnvelope),
}

/// Kinds of one-time codes the service can verify.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OtpKind {
    EmailVerification,
    TwoFactor,
}

/// Fields accepted by a user update.
#[derive(Clone, Debug, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<SecretString>,
    pub data: Option<serde_json::Value>,
}

/// Operations consumed from the external identity service.
pub trait IdentityService: Send + Sync + 'static {
    /// Session currently held by the service for this client, if any.
    fn get_current_session(
        &self,
    ) -> impl Future<Output = Result<Option<SessionEnvelope>, AuthError>> + Send;

    /// `Ok(None)` means the service accepted the credentials but returned no
    /// session; callers treat that as a failure.
    fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> impl Future<Output = Result<Option<SessionEnvelope>, AuthError>> + Send;

    fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        metadata: serde_json::Value,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<(), AuthError>> + Send;

    fn reset_password_for_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    fn update_user(
        &self,
        update: UserUpdate,
    ) -> impl Future<Output = Result<UserIdentity, AuthError>> + Send;

    /// Verify an emailed or TOTP one-time code; some flows hand back a
    /// session on success.
    fn verify_one_time_code(
        &self,
        token: &str,
        kind: OtpKind,
    ) -> impl Future<Output = Result<Option<SessionEnvelope>, AuthError>> + Send;

    /// Application-side profile record merged over the session identity.
    fn fetch_profile(
        &self,
        identity: &UserIdentity,
    ) -> impl Future<Output = Result<UserProfile, AuthError>> + Send;

    /// Subscribe to sign-in/sign-out/token-refresh notifications.
    fn subscribe_events(&self) -> broadcast::Receiver<IdentityEvent>;
}

/// Server-side session lookup from a raw cookie token, used by the edge gate
/// where no in-memory client state exists.
pub trait SessionResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Option<SessionEnvelope>, AuthError>> + Send;
}
