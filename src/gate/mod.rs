//! Edge request gate.
//!
//! Runs ahead of page delivery with nothing but the incoming request's
//! cookies: no snapshot, no guard, no client state. The middleware resolves
//! the session cookie against the identity service and short-circuits with a
//! redirect where the policy requires one; everything else passes through to
//! the wrapped pages. A session-lookup failure never turns into a 5xx.

pub mod handlers;

use crate::identity::SessionResolver;
use crate::policy::{RoutePolicy, DASHBOARD_PATH, LOGIN_PATH};
use crate::session::{epoch_seconds, SessionEnvelope, SESSION_KEY};
use anyhow::Result;
use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header::COOKIE, HeaderMap, HeaderName, HeaderValue},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;

pub const HEALTH_PATH: &str = "/health";

/// Shared state of the gate middleware.
pub struct GateState<R> {
    resolver: Arc<R>,
}

impl<R> GateState<R> {
    #[must_use]
    pub fn new(resolver: Arc<R>) -> Self {
        Self { resolver }
    }
}

impl<R> Clone for GateState<R> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
        }
    }
}

/// Session envelope persisted in the request cookie, if present and parsable.
fn cookie_session(headers: &HeaderMap) -> Option<SessionEnvelope> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        // Pairs without '=' are skipped, not fatal to the scan.
        let Some((key, val)) = pair.trim().split_once('=') else {
            continue;
        };
        if key.trim() == SESSION_KEY {
            return serde_json::from_str(val.trim()).ok();
        }
    }
    None
}

/// Resolve the cookie to a live session at the identity service.
///
/// `Ok(None)` covers the no-cookie, garbage-cookie, and expired-cookie cases;
/// only a transport or service failure surfaces as `Err`.
async fn live_session<R: SessionResolver>(
    state: &GateState<R>,
    headers: &HeaderMap,
) -> Result<Option<SessionEnvelope>, crate::errors::AuthError> {
    let Some(stored) = cookie_session(headers) else {
        return Ok(None);
    };
    if stored.remaining_seconds(epoch_seconds()) <= 0 {
        return Ok(None);
    }
    let resolved = state.resolver.resolve(&stored.access_token).await?;
    Ok(resolved.filter(|session| session.remaining_seconds(epoch_seconds()) > 0))
}

/// The gate middleware itself.
pub async fn gate<R: SessionResolver>(
    State(state): State<GateState<R>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    // Static assets and the health endpoint never trigger a session lookup.
    if path == HEALTH_PATH || RoutePolicy::is_static_asset(&path) {
        return next.run(request).await;
    }

    // The landing page defers its session check to the client so it costs no
    // extra round-trip.
    if path == "/" {
        return next.run(request).await;
    }

    let auth_entry = RoutePolicy::is_auth_entry(&path);
    let classified = RoutePolicy::entry_for(&path).is_some();
    if !auth_entry && !classified {
        return next.run(request).await;
    }

    match live_session(&state, request.headers()).await {
        // Signed-in users have no business on the auth entry pages.
        Ok(Some(_)) if auth_entry => Redirect::temporary(DASHBOARD_PATH).into_response(),
        Ok(Some(_)) => next.run(request).await,
        Ok(None) if auth_entry => next.run(request).await,
        Ok(None) => Redirect::temporary(&RoutePolicy::login_redirect(&path)).into_response(),
        Err(err) => {
            warn!(%path, "Session resolution failed at the edge: {err}");
            if auth_entry || RoutePolicy::is_public(&path) {
                next.run(request).await
            } else {
                Redirect::temporary(&format!("{LOGIN_PATH}?error=session_check_failed"))
                    .into_response()
            }
        }
    }
}

/// Wrap the page router with the gate middleware, the health endpoint, and
/// the request-id and tracing layers.
pub fn app<R: SessionResolver>(state: GateState<R>, pages: Router) -> Router {
    pages.route(HEALTH_PATH, get(handlers::health)).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(middleware::from_fn_with_state(state, gate::<R>)),
    )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn serve(port: u16, app: Router) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::cookie_session;
    use crate::session::{epoch_seconds, SessionEnvelope, UserIdentity, SESSION_KEY};
    use axum::http::{header::COOKIE, HeaderMap, HeaderValue};
    use uuid::Uuid;

    fn envelope() -> SessionEnvelope {
        SessionEnvelope {
            access_token: "token".to_string(),
            refresh_token: None,
            expires_at: epoch_seconds() + 3600,
            user: UserIdentity {
                id: Uuid::new_v4(),
                email: "kai@example.org".to_string(),
                role: "participant".to_string(),
                display_name: None,
            },
        }
    }

    #[test]
    fn cookie_session_parses_the_session_pair() {
        let serialized = serde_json::to_string(&envelope()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("other=1; {SESSION_KEY}={serialized}")).unwrap(),
        );
        let parsed = cookie_session(&headers).unwrap();
        assert_eq!(parsed.access_token, "token");
    }

    #[test]
    fn cookie_session_skips_malformed_pairs() {
        let serialized = serde_json::to_string(&envelope()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("bare-flag; {SESSION_KEY}={serialized}")).unwrap(),
        );
        let parsed = cookie_session(&headers).unwrap();
        assert_eq!(parsed.access_token, "token");
    }

    #[test]
    fn cookie_session_tolerates_absence_and_garbage() {
        let headers = HeaderMap::new();
        assert!(cookie_session(&headers).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_KEY}=not json")).unwrap(),
        );
        assert!(cookie_session(&headers).is_none());
    }
}
