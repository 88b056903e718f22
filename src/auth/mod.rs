//! Session state container and the client-side route guard built on it.

pub mod guard;
pub mod manager;
pub mod snapshot;
#[cfg(test)]
pub(crate) mod test_support;

pub use guard::{GuardConfig, LoadingState, Navigator, RouteGuard};
pub use manager::{HealthStatus, LoginOutcome, SessionManager};
pub use snapshot::AuthSnapshot;
