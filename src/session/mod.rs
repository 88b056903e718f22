//! Session envelope model, validity predicates, and dual-replica persistence.

pub mod envelope;
pub mod store;
pub mod validity;

pub use envelope::{Role, SessionEnvelope, SessionMetadata, UserIdentity, UserProfile};
pub use store::{
    CookieAttributes, CookieSink, MemoryCookieJar, MemoryStorage, SessionStore, StorageBackend,
    DEVICE_ID_KEY, LAST_ACTIVE_KEY, SESSION_KEY,
};
pub use validity::ValidityConfig;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as epoch seconds.
#[must_use]
pub fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64)
}
