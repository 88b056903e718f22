//! Process-wide reactive auth state.
//!
//! A single snapshot instance lives inside the session manager's watch
//! channel; every other component reads it or subscribes to it, and only the
//! manager's own methods mutate it.

use crate::session::{Role, SessionEnvelope, UserProfile};

/// Everything the rest of the application derives its auth UI from.
#[derive(Clone, Debug, Default)]
pub struct AuthSnapshot {
    pub user: Option<UserProfile>,
    pub session: Option<SessionEnvelope>,
    /// True iff `user` is present and the last validation passed.
    pub is_authenticated: bool,
    /// True only while an auth operation is in flight.
    pub is_loading: bool,
    pub is_initialized: bool,
    pub error: Option<String>,
    pub two_factor_required: bool,
    /// Epoch seconds of the last recorded activity.
    pub last_active: i64,
    pub remember_me: bool,
}

impl AuthSnapshot {
    /// Narrowed role of the current user, when authenticated.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        if self.is_authenticated {
            self.user.as_ref().map(|user| user.role)
        } else {
            None
        }
    }

    /// Reset to a signed-out state, keeping initialization intact.
    pub(crate) fn reset_to_unauthenticated(&mut self) {
        self.user = None;
        self.session = None;
        self.is_authenticated = false;
        self.two_factor_required = false;
        self.remember_me = false;
    }
}

#[cfg(test)]
mod tests {
    use super::AuthSnapshot;
    use crate::session::{Role, UserIdentity, UserProfile};
    use uuid::Uuid;

    #[test]
    fn role_is_only_exposed_while_authenticated() {
        let mut snapshot = AuthSnapshot::default();
        assert_eq!(snapshot.role(), None);

        let identity = UserIdentity {
            id: Uuid::new_v4(),
            email: "kai@example.org".to_string(),
            role: "admin".to_string(),
            display_name: None,
        };
        snapshot.user = Some(UserProfile::from_identity(&identity).unwrap());
        assert_eq!(snapshot.role(), None);

        snapshot.is_authenticated = true;
        assert_eq!(snapshot.role(), Some(Role::Admin));

        snapshot.reset_to_unauthenticated();
        assert_eq!(snapshot.role(), None);
        assert!(snapshot.user.is_none());
        assert!(snapshot.session.is_none());
    }
}
