//! Dual-replica session persistence: a durable key-value store as the
//! primary and a cookie as the secondary. Primary wins when valid; otherwise
//! the cookie is consulted and the primary repaired from it. Storage failures
//! degrade to "no session" and are never surfaced to callers.

use super::envelope::SessionEnvelope;
use super::epoch_seconds;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use ulid::Ulid;

/// Storage key for the serialized envelope, shared by both replicas.
pub const SESSION_KEY: &str = "varco_session";
/// Device identifier, primary store only.
pub const DEVICE_ID_KEY: &str = "varco_device_id";
/// Last-active epoch seconds, primary store only.
pub const LAST_ACTIVE_KEY: &str = "varco_last_active";

/// Durable string key-value storage (browser local storage, or an in-memory
/// map in tests and the demo server).
pub trait StorageBackend: Send + Sync {
    /// # Errors
    /// Returns an error when the underlying storage is unavailable.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// # Errors
    /// Returns an error when the value cannot be written (quota, detached).
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// # Errors
    /// Returns an error when the underlying storage is unavailable.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Attributes attached when the session cookie is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieAttributes {
    pub path: &'static str,
    pub same_site: &'static str,
    pub secure: bool,
    /// Cookie expiry, matching the session expiry, as epoch seconds.
    pub expires_at: i64,
}

impl CookieAttributes {
    #[must_use]
    pub fn new(secure: bool, expires_at: i64) -> Self {
        Self {
            path: "/",
            same_site: "Lax",
            secure,
            expires_at,
        }
    }

    /// Render a `Set-Cookie` style value.
    #[must_use]
    pub fn render(&self, name: &str, value: &str) -> String {
        let max_age = (self.expires_at - epoch_seconds()).max(0);
        let mut cookie = format!(
            "{name}={value}; Path={}; SameSite={}; Max-Age={max_age}",
            self.path, self.same_site
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Cookie replica of the session envelope.
pub trait CookieSink: Send + Sync {
    /// # Errors
    /// Returns an error when the cookie jar is unavailable.
    fn read(&self, name: &str) -> Result<Option<String>>;
    /// # Errors
    /// Returns an error when the cookie cannot be written.
    fn write(&self, name: &str, value: &str, attributes: &CookieAttributes) -> Result<()>;
    /// # Errors
    /// Returns an error when the cookie jar is unavailable.
    fn clear(&self, name: &str) -> Result<()>;
}

/// In-memory [`StorageBackend`].
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl StorageBackend for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// In-memory [`CookieSink`] honoring cookie expiry on read.
#[derive(Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<HashMap<String, (String, i64)>>,
}

impl CookieSink for MemoryCookieJar {
    fn read(&self, name: &str) -> Result<Option<String>> {
        let mut cookies = self.cookies.lock().unwrap();
        if let Some((value, expires_at)) = cookies.get(name).cloned() {
            if expires_at > epoch_seconds() {
                return Ok(Some(value));
            }
            cookies.remove(name);
        }
        Ok(None)
    }

    fn write(&self, name: &str, value: &str, attributes: &CookieAttributes) -> Result<()> {
        self.cookies
            .lock()
            .unwrap()
            .insert(name.to_string(), (value.to_string(), attributes.expires_at));
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<()> {
        self.cookies.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Two-source session store with defined precedence and repair.
pub struct SessionStore {
    primary: Arc<dyn StorageBackend>,
    cookies: Arc<dyn CookieSink>,
    secure_cookies: bool,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        primary: Arc<dyn StorageBackend>,
        cookies: Arc<dyn CookieSink>,
        secure_cookies: bool,
    ) -> Self {
        Self {
            primary,
            cookies,
            secure_cookies,
        }
    }

    /// Persist the envelope to both replicas. Envelopes missing a token or
    /// expiry fall through to [`Self::clear`]. Write failures are logged and
    /// swallowed.
    pub fn store(&self, session: Option<&SessionEnvelope>) {
        let Some(session) = session.filter(|session| session.storable()) else {
            self.clear();
            return;
        };

        let serialized = match serde_json::to_string(session) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!("Failed to serialize session: {err}");
                return;
            }
        };

        if let Err(err) = self.primary.set(SESSION_KEY, &serialized) {
            warn!("Failed to write session to primary storage: {err}");
        }

        let attributes = CookieAttributes::new(self.secure_cookies, session.expires_at);
        if let Err(err) = self.cookies.write(SESSION_KEY, &serialized, &attributes) {
            warn!("Failed to write session cookie: {err}");
        }
    }

    /// Read the stored envelope: primary first, cookie fallback with primary
    /// repair. Expired or malformed entries are removed opportunistically.
    /// Never fails; corruption degrades to `None`.
    #[must_use]
    pub fn get_stored(&self) -> Option<SessionEnvelope> {
        let now = epoch_seconds();

        match self.decode(self.primary.get(SESSION_KEY), now) {
            Ok(session) => return Some(session),
            Err(found_garbage) => {
                if found_garbage {
                    let _ = self.primary.remove(SESSION_KEY);
                }
            }
        }

        match self.decode(self.cookies.read(SESSION_KEY), now) {
            Ok(session) => {
                // Repair the primary from the surviving replica.
                if let Ok(serialized) = serde_json::to_string(&session) {
                    if let Err(err) = self.primary.set(SESSION_KEY, &serialized) {
                        debug!("Failed to repair primary session storage: {err}");
                    }
                }
                Some(session)
            }
            Err(found_garbage) => {
                if found_garbage {
                    let _ = self.cookies.clear(SESSION_KEY);
                }
                None
            }
        }
    }

    /// Remove the envelope from both replicas, best-effort.
    pub fn clear(&self) {
        if let Err(err) = self.primary.remove(SESSION_KEY) {
            warn!("Failed to clear session from primary storage: {err}");
        }
        if let Err(err) = self.cookies.clear(SESSION_KEY) {
            warn!("Failed to clear session cookie: {err}");
        }
    }

    /// Device identifier, generated once and persisted.
    #[must_use]
    pub fn device_id(&self) -> String {
        if let Ok(Some(existing)) = self.primary.get(DEVICE_ID_KEY) {
            if !existing.is_empty() {
                return existing;
            }
        }
        let generated = Ulid::new().to_string();
        if let Err(err) = self.primary.set(DEVICE_ID_KEY, &generated) {
            warn!("Failed to persist device id: {err}");
        }
        generated
    }

    #[must_use]
    pub fn last_active(&self) -> Option<i64> {
        self.primary
            .get(LAST_ACTIVE_KEY)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok())
    }

    pub fn touch(&self, now: i64) {
        if let Err(err) = self.primary.set(LAST_ACTIVE_KEY, &now.to_string()) {
            debug!("Failed to persist last-active timestamp: {err}");
        }
    }

    /// Decode one replica. `Err(true)` means a present-but-unusable entry
    /// that should be cleaned up; `Err(false)` means nothing was there.
    fn decode(&self, raw: Result<Option<String>>, now: i64) -> Result<SessionEnvelope, bool> {
        let raw = match raw {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(false),
            Err(err) => {
                debug!("Session storage read failed: {err}");
                return Err(false);
            }
        };

        match serde_json::from_str::<SessionEnvelope>(&raw) {
            Ok(session) if session.remaining_seconds(now) > 0 => Ok(session),
            Ok(_) => Err(true),  // expired
            Err(err) => {
                debug!("Discarding malformed session entry: {err}");
                Err(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        CookieAttributes, CookieSink, MemoryCookieJar, MemoryStorage, SessionStore,
        StorageBackend, SESSION_KEY,
    };
    use crate::session::envelope::{SessionEnvelope, UserIdentity};
    use crate::session::epoch_seconds;
    use std::sync::Arc;
    use uuid::Uuid;

    fn session(expires_in: i64) -> SessionEnvelope {
        SessionEnvelope {
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: epoch_seconds() + expires_in,
            user: UserIdentity {
                id: Uuid::new_v4(),
                email: "kai@example.org".to_string(),
                role: "participant".to_string(),
                display_name: None,
            },
        }
    }

    fn store() -> (SessionStore, Arc<MemoryStorage>, Arc<MemoryCookieJar>) {
        let primary = Arc::new(MemoryStorage::default());
        let cookies = Arc::new(MemoryCookieJar::default());
        let store = SessionStore::new(primary.clone(), cookies.clone(), false);
        (store, primary, cookies)
    }

    #[test]
    fn round_trips_a_valid_session() {
        let (store, _, _) = store();
        let session = session(60 * 60);
        store.store(Some(&session));
        assert_eq!(store.get_stored(), Some(session));
    }

    #[test]
    fn clear_always_leaves_nothing() {
        let (store, _, _) = store();
        store.store(Some(&session(60 * 60)));
        store.clear();
        assert_eq!(store.get_stored(), None);
        // Idempotent on an already-empty store.
        store.clear();
        assert_eq!(store.get_stored(), None);
    }

    #[test]
    fn storing_a_tokenless_session_clears_instead() {
        let (store, _, _) = store();
        store.store(Some(&session(60 * 60)));

        let mut bad = session(60 * 60);
        bad.access_token.clear();
        store.store(Some(&bad));
        assert_eq!(store.get_stored(), None);

        store.store(Some(&session(60 * 60)));
        store.store(None);
        assert_eq!(store.get_stored(), None);
    }

    #[test]
    fn expired_sessions_are_never_returned() {
        let (store, primary, _) = store();
        let stale = session(-60 * 60);
        let serialized = serde_json::to_string(&stale).unwrap();
        primary.set(SESSION_KEY, &serialized).unwrap();

        assert_eq!(store.get_stored(), None);
        // The expired entry was removed in passing.
        assert_eq!(primary.get(SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn malformed_entries_are_swallowed_and_removed() {
        let (store, primary, cookies) = store();
        primary.set(SESSION_KEY, "not json").unwrap();
        cookies
            .write(
                SESSION_KEY,
                "{\"broken\":",
                &CookieAttributes::new(false, epoch_seconds() + 600),
            )
            .unwrap();

        assert_eq!(store.get_stored(), None);
        assert_eq!(primary.get(SESSION_KEY).unwrap(), None);
        assert_eq!(cookies.read(SESSION_KEY).unwrap(), None);
        // Subsequent reads stay quiet without re-parsing garbage.
        assert_eq!(store.get_stored(), None);
    }

    #[test]
    fn cookie_fallback_repairs_the_primary() {
        let (store, primary, cookies) = store();
        let session = session(60 * 60);
        let serialized = serde_json::to_string(&session).unwrap();
        cookies
            .write(
                SESSION_KEY,
                &serialized,
                &CookieAttributes::new(false, session.expires_at),
            )
            .unwrap();

        assert_eq!(store.get_stored(), Some(session));
        assert!(primary.get(SESSION_KEY).unwrap().is_some());
    }

    #[test]
    fn device_id_is_generated_once() {
        let (store, _, _) = store();
        let first = store.device_id();
        assert!(!first.is_empty());
        assert_eq!(store.device_id(), first);
    }

    #[test]
    fn last_active_round_trips() {
        let (store, _, _) = store();
        assert_eq!(store.last_active(), None);
        store.touch(1_700_000_000);
        assert_eq!(store.last_active(), Some(1_700_000_000));
    }

    #[test]
    fn cookie_attributes_render_like_a_set_cookie_header() {
        let attributes = CookieAttributes::new(true, epoch_seconds() + 600);
        let rendered = attributes.render(SESSION_KEY, "value");
        assert!(rendered.starts_with("varco_session=value; Path=/; SameSite=Lax; Max-Age="));
        assert!(rendered.ends_with("; Secure"));

        let insecure = CookieAttributes::new(false, epoch_seconds() + 600);
        assert!(!insecure.render(SESSION_KEY, "value").contains("Secure"));
    }
}
