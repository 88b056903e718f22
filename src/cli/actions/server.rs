use crate::cli::{actions::Action, globals::GlobalArgs};
use crate::gate::{app, serve, GateState};
use crate::APP_USER_AGENT;
use crate::identity::http::HttpIdentity;
use anyhow::{Context, Result};
use axum::Router;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Handle the server action
pub async fn handle(action: Action, globals: &GlobalArgs) -> Result<()> {
    match action {
        Action::Server { port, identity_url } => {
            let base_url = Url::parse(&globals.base_url)
                .with_context(|| format!("Invalid base URL: {}", globals.base_url))?;

            let mut identity = HttpIdentity::new(APP_USER_AGENT, &identity_url)?;
            if !globals.identity_token.expose_secret().is_empty() {
                identity = identity.with_token(globals.identity_token.clone());
            }

            info!("Gating pages served from {base_url}");

            let state = GateState::new(Arc::new(identity));
            serve(port, app(state, Router::new())).await?;
        }
    }

    Ok(())
}
