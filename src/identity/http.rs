//! HTTP client for the identity service API.
//!
//! Thin transport: endpoints return the session envelope as JSON (or 204 for
//! "no session") and errors as `{"code": ..., "message": ...}`. Nothing here
//! interprets the protocol beyond envelope fields and error codes.

use super::{IdentityEvent, IdentityService, OtpKind, SessionResolver, UserUpdate};
use crate::errors::AuthError;
use crate::session::{SessionEnvelope, UserIdentity, UserProfile};
use anyhow::{anyhow, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info_span, Instrument};
use url::Url;

const EVENT_CAPACITY: usize = 16;

/// Build `{scheme}://{host}:{port}{path}` from a configured base URL.
///
/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an
/// unsupported scheme.
pub fn endpoint_url(url: &str, path: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {scheme}")),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{path}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

fn error_fields(body: &Value) -> (Option<&str>, &str) {
    let code = body.get("code").and_then(Value::as_str);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("identity service request failed");
    (code, message)
}

/// Map a non-success response to the taxonomy. Server-side failures stay
/// retryable; everything else is terminal.
async fn classify(endpoint: &str, response: Response) -> AuthError {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    let (code, message) = error_fields(&body);

    match (status, code) {
        (StatusCode::TOO_MANY_REQUESTS, _) => AuthError::RateLimit(message.to_string()),
        (StatusCode::UNAUTHORIZED, Some("invalid_credentials")) => AuthError::InvalidCredentials,
        (StatusCode::UNAUTHORIZED, Some("session_expired")) => AuthError::SessionExpired,
        (StatusCode::UNAUTHORIZED, Some("concurrent_session")) => AuthError::ConcurrentSession,
        (StatusCode::UNAUTHORIZED, _) => AuthError::Session(message.to_string()),
        (StatusCode::FORBIDDEN, Some("email_not_verified")) => AuthError::EmailNotVerified,
        (StatusCode::FORBIDDEN, Some("two_factor_required")) => AuthError::TwoFactorRequired,
        (StatusCode::FORBIDDEN, _) => AuthError::Csrf,
        (status, _) if status.is_server_error() => {
            AuthError::Network(format!("{endpoint} - {status}, {message}"))
        }
        (status, _) => AuthError::Session(format!("{endpoint} - {status}, {message}")),
    }
}

/// Reqwest-backed [`IdentityService`] and [`SessionResolver`].
pub struct HttpIdentity {
    client: Client,
    base_url: String,
    /// Access token for the session this client currently holds.
    current_token: Mutex<Option<SecretString>>,
    events: broadcast::Sender<IdentityEvent>,
}

impl HttpIdentity {
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(user_agent: &str, base_url: &str) -> Result<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            current_token: Mutex::new(None),
            events: broadcast::channel(EVENT_CAPACITY).0,
        })
    }

    /// Seed the client with a pre-issued token, as when the gate runs with a
    /// service credential instead of a user session.
    #[must_use]
    pub fn with_token(self, token: SecretString) -> Self {
        *self.current_token.lock().unwrap() = Some(token);
        self
    }

    fn url(&self, path: &str) -> Result<String, AuthError> {
        endpoint_url(&self.base_url, path)
            .map_err(|err| AuthError::Network(format!("invalid identity endpoint: {err}")))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.current_token.lock().unwrap();
        match token.as_ref() {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    fn remember_token(&self, session: Option<&SessionEnvelope>) {
        let mut current = self.current_token.lock().unwrap();
        *current = session.map(|session| SecretString::from(session.access_token.clone()));
    }

    fn emit(&self, event: IdentityEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    async fn session_from(&self, endpoint: &str, response: Response) -> Result<Option<SessionEnvelope>, AuthError> {
        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let session: SessionEnvelope = response
                    .json()
                    .await
                    .map_err(|err| AuthError::Network(format!("{endpoint} - {err}")))?;
                Ok(Some(session))
            }
            _ => Err(classify(endpoint, response).await),
        }
    }
}

impl IdentityService for HttpIdentity {
    async fn get_current_session(&self) -> Result<Option<SessionEnvelope>, AuthError> {
        let endpoint = self.url("/v1/auth/session")?;
        let span = info_span!("identity.session", http.method = "GET", url = %endpoint);
        let response = self
            .authorized(self.client.get(&endpoint))
            .send()
            .instrument(span)
            .await?;

        let session = self.session_from(&endpoint, response).await?;

        // Token rotation shows up here first; surface it to subscribers.
        if let Some(session) = &session {
            let rotated = {
                let current = self.current_token.lock().unwrap();
                current
                    .as_ref()
                    .is_some_and(|token| token.expose_secret() != session.access_token)
            };
            if rotated {
                self.emit(IdentityEvent::TokenRefreshed(session.clone()));
            }
        }
        self.remember_token(session.as_ref());
        Ok(session)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<Option<SessionEnvelope>, AuthError> {
        let endpoint = self.url("/v1/auth/login")?;
        let span = info_span!("identity.login", http.method = "POST", url = %endpoint);
        let response = self
            .client
            .post(&endpoint)
            .json(&json!({
                "email": email,
                "password": password.expose_secret(),
            }))
            .send()
            .instrument(span)
            .await?;

        let session = self.session_from(&endpoint, response).await?;
        self.remember_token(session.as_ref());
        if let Some(session) = &session {
            self.emit(IdentityEvent::SignedIn(session.clone()));
        }
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        metadata: Value,
    ) -> Result<(), AuthError> {
        let endpoint = self.url("/v1/auth/signup")?;
        let span = info_span!("identity.signup", http.method = "POST", url = %endpoint);
        let response = self
            .client
            .post(&endpoint)
            .json(&json!({
                "email": email,
                "password": password.expose_secret(),
                "metadata": metadata,
            }))
            .send()
            .instrument(span)
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(AuthError::Session(
                "an account with this email already exists".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(classify(&endpoint, response).await);
        }
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let endpoint = self.url("/v1/auth/logout")?;
        let span = info_span!("identity.logout", http.method = "POST", url = %endpoint);
        let response = self
            .authorized(self.client.post(&endpoint))
            .send()
            .instrument(span)
            .await?;

        self.remember_token(None);
        self.emit(IdentityEvent::SignedOut);

        if !response.status().is_success() {
            return Err(classify(&endpoint, response).await);
        }
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str) -> Result<(), AuthError> {
        let endpoint = self.url("/v1/auth/reset-password")?;
        let span = info_span!("identity.reset_password", http.method = "POST", url = %endpoint);
        let response = self
            .client
            .post(&endpoint)
            .json(&json!({ "email": email }))
            .send()
            .instrument(span)
            .await?;

        if !response.status().is_success() {
            return Err(classify(&endpoint, response).await);
        }
        Ok(())
    }

    async fn update_user(&self, update: UserUpdate) -> Result<UserIdentity, AuthError> {
        let endpoint = self.url("/v1/auth/user")?;
        let span = info_span!("identity.update_user", http.method = "PATCH", url = %endpoint);
        let mut body = json!({});
        if let Some(email) = update.email {
            body["email"] = json!(email);
        }
        if let Some(password) = update.password {
            body["password"] = json!(password.expose_secret());
        }
        if let Some(data) = update.data {
            body["data"] = data;
        }
        let response = self
            .authorized(self.client.patch(&endpoint))
            .json(&body)
            .send()
            .instrument(span)
            .await?;

        if !response.status().is_success() {
            return Err(classify(&endpoint, response).await);
        }
        response
            .json()
            .await
            .map_err(|err| AuthError::Network(format!("{endpoint} - {err}")))
    }

    async fn verify_one_time_code(
        &self,
        token: &str,
        kind: OtpKind,
    ) -> Result<Option<SessionEnvelope>, AuthError> {
        let endpoint = self.url("/v1/auth/verify")?;
        let span = info_span!("identity.verify", http.method = "POST", url = %endpoint);
        let kind = match kind {
            OtpKind::EmailVerification => "email",
            OtpKind::TwoFactor => "totp",
        };
        let response = self
            .authorized(self.client.post(&endpoint))
            .json(&json!({ "token": token, "type": kind }))
            .send()
            .instrument(span)
            .await?;

        let session = self.session_from(&endpoint, response).await?;
        if let Some(session) = &session {
            self.remember_token(Some(session));
            self.emit(IdentityEvent::SignedIn(session.clone()));
        }
        Ok(session)
    }

    async fn fetch_profile(&self, identity: &UserIdentity) -> Result<UserProfile, AuthError> {
        let endpoint = self.url(&format!("/v1/profiles/{}", identity.id))?;
        let span = info_span!("identity.profile", http.method = "GET", url = %endpoint);
        let response = self
            .authorized(self.client.get(&endpoint))
            .send()
            .instrument(span)
            .await?;

        if !response.status().is_success() {
            return Err(classify(&endpoint, response).await);
        }
        response
            .json()
            .await
            .map_err(|err| AuthError::Network(format!("{endpoint} - {err}")))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}

impl SessionResolver for HttpIdentity {
    async fn resolve(&self, token: &str) -> Result<Option<SessionEnvelope>, AuthError> {
        let endpoint = self.url("/v1/auth/session")?;
        let span = info_span!("identity.resolve", http.method = "GET", url = %endpoint);
        let response = self
            .client
            .get(&endpoint)
            .bearer_auth(token)
            .send()
            .instrument(span)
            .await?;

        self.session_from(&endpoint, response).await
    }
}
