//! # Varco (Session Lifecycle & Route Access Gate)
//!
//! `varco` manages browser-style session lifecycles for a multi-tenant
//! application with participant, researcher, and admin roles, and gates route
//! access both client-side and at the request edge.
//!
//! ## Session model
//!
//! A session envelope (tokens, expiry, user identity) is duplicated across a
//! primary storage backend and a cookie replica, reconciled on read. Validity
//! combines an expiry buffer with an inactivity window; either violation
//! invalidates the session.
//!
//! ## Roles & policy
//!
//! The external service's role claim is narrowed into a closed enum before
//! any policy decision. A static route policy table classifies paths as
//! public, private, or role-restricted; unlisted paths require
//! authentication. Both the client guard and the edge gate consult the same
//! table.
//!
//! ## Concurrency
//!
//! One process-wide auth snapshot lives behind a `watch` channel and is
//! mutated only by the session manager's own methods. The guard owns every
//! timer and subscription it creates and releases them on unmount. Sibling
//! tabs synchronize over a best-effort broadcast channel; a missed message is
//! corrected by the next health check.

pub mod auth;
pub mod broadcast;
pub mod cli;
pub mod errors;
pub mod gate;
pub mod identity;
pub mod policy;
pub mod retry;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        // Should be a hex string (full SHA-1 is 40 chars, but could be short)
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
