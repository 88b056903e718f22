//! Static route policy: which paths need which roles, and where to send
//! everyone else. Loaded once, immutable at runtime, consulted by both the
//! client-side guard and the edge gate. Evaluation never fails; unknown paths
//! get the most restrictive classification.

use crate::session::Role;
use url::form_urlencoded;

/// Access classification of a policy entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessClass {
    /// Reachable without a session.
    Public,
    /// Requires any authenticated session.
    Private,
    /// Requires one of the listed roles.
    Restricted,
}

/// One static rule mapping a path prefix to required roles and a fallback.
#[derive(Clone, Debug)]
pub struct PolicyEntry {
    prefix: &'static str,
    roles: &'static [Role],
    class: AccessClass,
    fallback: &'static str,
}

impl PolicyEntry {
    const fn new(
        prefix: &'static str,
        roles: &'static [Role],
        class: AccessClass,
        fallback: &'static str,
    ) -> Self {
        Self {
            prefix,
            roles,
            class,
            fallback,
        }
    }

    fn matches(&self, path: &str) -> bool {
        path == self.prefix
            || (path.starts_with(self.prefix)
                && path.as_bytes().get(self.prefix.len()) == Some(&b'/'))
    }

    #[must_use]
    pub fn class(&self) -> AccessClass {
        self.class
    }
}

/// Outcome of a policy evaluation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decision {
    Allow,
    Redirect(String),
}

pub const LOGIN_PATH: &str = "/login";
pub const DASHBOARD_PATH: &str = "/dashboard";
pub const RESEARCHER_HOME: &str = "/researcher";

const PUBLIC_PATHS: &[&str] = &[
    "/",
    "/login",
    "/signup",
    "/reset-password",
    "/verify-email",
    "/about",
    "/privacy",
    "/terms",
];

/// Paths that are entry points into the auth flow; authenticated users are
/// bounced off them to their home.
const AUTH_ENTRY_PATHS: &[&str] = &["/login", "/signup", "/reset-password"];

const STATIC_PREFIXES: &[&str] = &["/assets/", "/static/", "/_app/"];
const STATIC_FILES: &[&str] = &["/favicon.ico", "/robots.txt"];
const STATIC_EXTENSIONS: &[&str] = &[
    ".css", ".js", ".map", ".png", ".jpg", ".jpeg", ".svg", ".ico", ".webp", ".woff", ".woff2",
];

const ENTRIES: &[PolicyEntry] = &[
    PolicyEntry::new("/dashboard", &[], AccessClass::Private, DASHBOARD_PATH),
    PolicyEntry::new("/studies", &[], AccessClass::Private, DASHBOARD_PATH),
    PolicyEntry::new("/settings", &[], AccessClass::Private, DASHBOARD_PATH),
    PolicyEntry::new(
        "/researcher",
        &[Role::Researcher, Role::Admin],
        AccessClass::Restricted,
        DASHBOARD_PATH,
    ),
    PolicyEntry::new(
        "/participants",
        &[Role::Researcher, Role::Admin],
        AccessClass::Restricted,
        DASHBOARD_PATH,
    ),
    PolicyEntry::new(
        "/admin",
        &[Role::Admin],
        AccessClass::Restricted,
        DASHBOARD_PATH,
    ),
];

/// The static policy table plus its classification helpers.
#[derive(Clone, Debug, Default)]
pub struct RoutePolicy;

impl RoutePolicy {
    /// Framework-internal or static-asset path; never triggers a session
    /// check.
    #[must_use]
    pub fn is_static_asset(path: &str) -> bool {
        STATIC_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix))
            || STATIC_FILES.contains(&path)
            || STATIC_EXTENSIONS
                .iter()
                .any(|extension| path.ends_with(extension))
    }

    #[must_use]
    pub fn is_public(path: &str) -> bool {
        PUBLIC_PATHS.contains(&path)
    }

    #[must_use]
    pub fn is_auth_entry(path: &str) -> bool {
        AUTH_ENTRY_PATHS.contains(&path)
    }

    /// Canonical post-login destination for a role.
    #[must_use]
    pub fn home_for(role: Role) -> &'static str {
        match role {
            Role::Researcher => RESEARCHER_HOME,
            Role::Participant | Role::Admin => DASHBOARD_PATH,
        }
    }

    /// Login redirect carrying the attempted path back as `returnUrl`.
    #[must_use]
    pub fn login_redirect(attempted: &str) -> String {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("returnUrl", attempted)
            .finish();
        format!("{LOGIN_PATH}?{query}")
    }

    #[must_use]
    pub fn entry_for(path: &str) -> Option<&'static PolicyEntry> {
        ENTRIES.iter().find(|entry| entry.matches(path))
    }

    /// Evaluate a path against the table. `role` is `None` for an
    /// unauthenticated visitor.
    #[must_use]
    pub fn decide(path: &str, role: Option<Role>) -> Decision {
        // 1. Static assets bypass every check.
        if Self::is_static_asset(path) {
            return Decision::Allow;
        }

        // 2. The landing page is open when signed out and bounces signed-in
        //    users to their home.
        if path == "/" {
            return match role {
                None => Decision::Allow,
                Some(role) => Decision::Redirect(Self::home_for(role).to_string()),
            };
        }

        // 3. Public paths, with auth entry points bouncing signed-in users.
        if Self::is_public(path) {
            return match role {
                Some(role) if Self::is_auth_entry(path) => {
                    Decision::Redirect(Self::home_for(role).to_string())
                }
                _ => Decision::Allow,
            };
        }

        // 4. Listed paths: authentication first, then the role set.
        if let Some(entry) = Self::entry_for(path) {
            return match role {
                None => Decision::Redirect(Self::login_redirect(path)),
                Some(role) if !entry.roles.is_empty() && !entry.roles.contains(&role) => {
                    Decision::Redirect(entry.fallback.to_string())
                }
                Some(_) => Decision::Allow,
            };
        }

        // 5. Unlisted paths default-deny: authentication required.
        match role {
            None => Decision::Redirect(Self::login_redirect(path)),
            Some(_) => Decision::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Decision, RoutePolicy};
    use crate::session::Role;

    #[test]
    fn static_assets_always_pass() {
        for path in [
            "/assets/app.css",
            "/static/logo.png",
            "/_app/chunk.js",
            "/favicon.ico",
            "/robots.txt",
            "/fonts/inter.woff2",
        ] {
            assert!(RoutePolicy::is_static_asset(path), "{path}");
            assert_eq!(RoutePolicy::decide(path, None), Decision::Allow);
        }
        assert!(!RoutePolicy::is_static_asset("/dashboard"));
    }

    #[test]
    fn public_paths_allow_unauthenticated_visitors() {
        for path in ["/", "/login", "/signup", "/about", "/terms"] {
            assert_eq!(RoutePolicy::decide(path, None), Decision::Allow, "{path}");
        }
    }

    #[test]
    fn root_bounces_signed_in_users_home() {
        assert_eq!(
            RoutePolicy::decide("/", Some(Role::Researcher)),
            Decision::Redirect("/researcher".to_string())
        );
        assert_eq!(
            RoutePolicy::decide("/", Some(Role::Participant)),
            Decision::Redirect("/dashboard".to_string())
        );
        assert_eq!(
            RoutePolicy::decide("/", Some(Role::Admin)),
            Decision::Redirect("/dashboard".to_string())
        );
    }

    #[test]
    fn auth_entry_paths_bounce_signed_in_users() {
        assert_eq!(
            RoutePolicy::decide("/login", Some(Role::Participant)),
            Decision::Redirect("/dashboard".to_string())
        );
        // Public non-entry pages remain reachable while signed in.
        assert_eq!(
            RoutePolicy::decide("/about", Some(Role::Participant)),
            Decision::Allow
        );
    }

    #[test]
    fn protected_paths_redirect_to_login_with_return_url() {
        assert_eq!(
            RoutePolicy::decide("/dashboard", None),
            Decision::Redirect("/login?returnUrl=%2Fdashboard".to_string())
        );
        assert_eq!(
            RoutePolicy::decide("/studies/42/edit", None),
            Decision::Redirect("/login?returnUrl=%2Fstudies%2F42%2Fedit".to_string())
        );
    }

    #[test]
    fn role_sets_gate_restricted_paths() {
        // Wrong role goes to the entry fallback, not to login.
        assert_eq!(
            RoutePolicy::decide("/admin", Some(Role::Participant)),
            Decision::Redirect("/dashboard".to_string())
        );
        assert_eq!(
            RoutePolicy::decide("/admin/users", Some(Role::Researcher)),
            Decision::Redirect("/dashboard".to_string())
        );
        assert_eq!(
            RoutePolicy::decide("/admin", Some(Role::Admin)),
            Decision::Allow
        );
        assert_eq!(
            RoutePolicy::decide("/researcher/studies", Some(Role::Researcher)),
            Decision::Allow
        );
    }

    #[test]
    fn prefix_matching_respects_segment_boundaries() {
        // "/adminland" is not under "/admin"; it falls to default-deny.
        assert_eq!(
            RoutePolicy::decide("/adminland", Some(Role::Participant)),
            Decision::Allow
        );
        assert_eq!(
            RoutePolicy::decide("/adminland", None),
            Decision::Redirect(RoutePolicy::login_redirect("/adminland"))
        );
    }

    #[test]
    fn unlisted_paths_default_to_requiring_authentication() {
        assert_eq!(
            RoutePolicy::decide("/reports/weekly", None),
            Decision::Redirect("/login?returnUrl=%2Freports%2Fweekly".to_string())
        );
        assert_eq!(
            RoutePolicy::decide("/reports/weekly", Some(Role::Participant)),
            Decision::Allow
        );
    }
}
