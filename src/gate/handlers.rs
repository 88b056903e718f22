//! HTTP handlers served by the gate itself.

use crate::GIT_COMMIT_HASH;
use axum::{
    http::Method,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
}

// axum handler for health
pub async fn health(method: Method) -> impl IntoResponse {
    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    // HEAD gets status only
    if method == Method::HEAD {
        Json(serde_json::Value::Null).into_response()
    } else {
        Json(health).into_response()
    }
}
