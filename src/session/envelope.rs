//! Session envelope and user model. The envelope is owned by the identity
//! service; this crate only stores and forwards it. Role claims arrive as
//! untyped strings and are narrowed here, at the boundary, before any policy
//! decision sees them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Authorization tiers recognized by the route policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Participant,
    Researcher,
    Admin,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(claim: &str) -> Result<Self, Self::Err> {
        match claim.trim().to_lowercase().as_str() {
            "participant" => Ok(Self::Participant),
            "researcher" => Ok(Self::Researcher),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role claim: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Participant => "participant",
            Self::Researcher => "researcher",
            Self::Admin => "admin",
        };
        write!(formatter, "{name}")
    }
}

/// Identity claims embedded in the session envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub email: String,
    /// Raw role claim as issued by the identity service.
    pub role: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserIdentity {
    /// Narrow the raw role claim into the closed enum.
    ///
    /// # Errors
    /// Returns the unrecognized claim when it is outside the closed set.
    pub fn role(&self) -> Result<Role, String> {
        self.role.parse()
    }
}

/// Authentication record issued by the identity service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as epoch seconds.
    pub expires_at: i64,
    pub user: UserIdentity,
}

impl SessionEnvelope {
    /// Seconds until expiry relative to `now`; negative once expired.
    #[must_use]
    pub fn remaining_seconds(&self, now: i64) -> i64 {
        self.expires_at - now
    }

    /// Whether the envelope carries the fields persistence requires.
    #[must_use]
    pub fn storable(&self) -> bool {
        !self.access_token.is_empty() && self.expires_at > 0
    }
}

/// Local projection of the session identity merged with the application-side
/// profile record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl UserProfile {
    /// Minimal profile projected from session claims alone. Used when the
    /// application-side profile fetch fails but the session is still valid.
    ///
    /// # Errors
    /// Returns the unrecognized claim when the role cannot be narrowed.
    pub fn from_identity(identity: &UserIdentity) -> Result<Self, String> {
        Ok(Self {
            id: identity.id,
            email: identity.email.clone(),
            role: identity.role()?,
            first_name: identity.display_name.clone(),
            last_name: None,
            avatar_url: None,
        })
    }
}

/// Device-scoped metadata kept alongside the envelope. Never consulted by the
/// route policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub device_id: String,
    /// Epoch seconds of the last user-visible activity.
    pub last_active: i64,
    pub remember_me: bool,
}
