//! Client-side route guard.
//!
//! Mounted once at the application root, it drives initialization, reacts to
//! identity-service notifications and cross-tab messages, runs the periodic
//! health and refresh timers, and enforces the route policy on every path
//! change. Every task it spawns is tracked and released on unmount; tasks
//! hold only a weak handle so an unmounted guard cannot be kept alive by its
//! own timers.

use super::manager::{HealthStatus, SessionManager};
use crate::broadcast::SessionMessage;
use crate::identity::{IdentityEvent, IdentityService};
use crate::policy::{Decision, RoutePolicy, LOGIN_PATH};
use crate::session::epoch_seconds;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEALTH_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Host-shell navigation. `redirect` is a soft client-side navigation;
/// `replace` is a full-document navigation used when server-rendered state
/// must be reloaded cleanly.
pub trait Navigator: Send + Sync + 'static {
    fn redirect(&self, to: &str);
    fn replace(&self, to: &str);
}

/// Guard lifecycle surfaced to observers (the blocking overlay of the host
/// UI keys off this).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadingState {
    Initializing,
    Redirecting,
    Idle,
}

/// Timer tuning for the guard.
#[derive(Clone, Copy, Debug)]
pub struct GuardConfig {
    init_timeout: Duration,
    health_interval: Duration,
    refresh_interval: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
            health_interval: DEFAULT_HEALTH_INTERVAL,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl GuardConfig {
    #[must_use]
    pub fn with_init_timeout(mut self, value: Duration) -> Self {
        self.init_timeout = value;
        self
    }

    #[must_use]
    pub fn with_health_interval(mut self, value: Duration) -> Self {
        self.health_interval = value;
        self
    }

    #[must_use]
    pub fn with_refresh_interval(mut self, value: Duration) -> Self {
        self.refresh_interval = value;
        self
    }
}

/// The mounted guard instance.
pub struct RouteGuard<I, N> {
    manager: Arc<SessionManager<I>>,
    navigator: Arc<N>,
    config: GuardConfig,
    loading: watch::Sender<LoadingState>,
    path: watch::Sender<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<I: IdentityService, N: Navigator> RouteGuard<I, N> {
    /// Mount the guard: start initialization and arm every periodic task.
    pub fn mount(
        manager: Arc<SessionManager<I>>,
        navigator: Arc<N>,
        config: GuardConfig,
        initial_path: &str,
    ) -> Arc<Self> {
        let guard = Arc::new(Self {
            manager,
            navigator,
            config,
            loading: watch::channel(LoadingState::Initializing).0,
            path: watch::channel(initial_path.to_string()).0,
            tasks: Mutex::new(Vec::new()),
        });

        guard.spawn_init();
        guard.spawn_event_listener();
        guard.spawn_health_check();
        guard.spawn_refresh();
        guard.spawn_broadcast_listener();
        guard.spawn_enforcement();
        guard
    }

    /// Observe the guard's loading state.
    #[must_use]
    pub fn loading(&self) -> watch::Receiver<LoadingState> {
        self.loading.subscribe()
    }

    /// Report a navigation. Re-runs route enforcement; a pending redirect is
    /// considered completed by the arrival of a new path.
    pub fn set_path(&self, path: &str) {
        self.path.send_if_modified(|current| {
            if current == path {
                false
            } else {
                *current = path.to_string();
                true
            }
        });
        if *self.loading.borrow() == LoadingState::Redirecting {
            self.set_loading(LoadingState::Idle);
        }
    }

    /// Release every timer and subscription. Idempotent; also run on drop.
    pub fn unmount(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    fn current_path(&self) -> String {
        self.path.borrow().clone()
    }

    fn set_loading(&self, state: LoadingState) {
        self.loading.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().unwrap().push(task);
    }

    /// Evaluate the policy for the current path and redirect if disallowed.
    fn enforce(&self) {
        if *self.loading.borrow() != LoadingState::Idle {
            return;
        }
        let snapshot = self.manager.snapshot();
        if !snapshot.is_initialized {
            return;
        }
        let path = self.current_path();
        match RoutePolicy::decide(&path, snapshot.role()) {
            Decision::Allow => {}
            Decision::Redirect(target) => {
                debug!(%path, %target, "Route disallowed, redirecting");
                self.set_loading(LoadingState::Redirecting);
                self.navigator.redirect(&target);
            }
        }
    }

    /// On a public or auth path nothing forces a login redirect.
    fn on_shielded_path(&self) -> bool {
        RoutePolicy::is_public(&self.current_path())
    }

    fn spawn_init(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let init_timeout = self.config.init_timeout;
        self.track(tokio::spawn(async move {
            let Some(guard) = weak.upgrade() else { return };
            // The timeout cancels the waiting state only; initialization
            // keeps running and later state wins if it completes after all.
            let pending = tokio::spawn({
                let manager = guard.manager.clone();
                async move { manager.initialize().await }
            });
            let finished = timeout(init_timeout, pending).await;
            guard.set_loading(LoadingState::Idle);
            match finished {
                Ok(_) => guard.enforce(),
                Err(_) => {
                    warn!("Initialization timed out, failing closed to login");
                    if !guard.on_shielded_path() {
                        guard.navigator.redirect(LOGIN_PATH);
                    }
                }
            }
        }));
    }

    fn spawn_event_listener(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut events = self.manager.identity_events();
        self.track(tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "Identity event stream lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                let Some(guard) = weak.upgrade() else { return };
                guard.handle_identity_event(event).await;
            }
        }));
    }

    async fn handle_identity_event(&self, event: IdentityEvent) {
        match event {
            IdentityEvent::SignedOut => {
                self.manager.force_unauthenticated(None);
                if !self.on_shielded_path() {
                    self.navigator.redirect(LOGIN_PATH);
                }
            }
            IdentityEvent::SignedIn(session) => {
                let now = epoch_seconds();
                let buffer = self.manager.validity().expiry_buffer_seconds();
                if session.remaining_seconds(now) <= buffer {
                    warn!("Signed-in session is already expired, forcing logout");
                    self.manager.logout().await;
                    self.navigator.redirect(LOGIN_PATH);
                    return;
                }
                let Ok(role) = session.user.role() else {
                    warn!("Signed-in session carries an unknown role claim");
                    return;
                };
                // Full navigation so server-rendered state reloads clean.
                if self.on_shielded_path() {
                    self.navigator.replace(RoutePolicy::home_for(role));
                }
            }
            IdentityEvent::TokenRefreshed(session) => {
                self.manager.adopt_announced(session);
            }
        }
    }

    fn spawn_health_check(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.config.health_interval;
        self.track(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(guard) = weak.upgrade() else { return };
                if !guard.manager.snapshot().is_initialized {
                    continue;
                }
                if guard.manager.health_check().await == HealthStatus::Lost {
                    if guard.on_shielded_path() {
                        guard.manager.force_unauthenticated(None);
                    } else {
                        guard.manager.logout().await;
                        guard.navigator.redirect(LOGIN_PATH);
                    }
                }
            }
        }));
    }

    fn spawn_refresh(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self.config.refresh_interval;
        self.track(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(guard) = weak.upgrade() else { return };
                if !guard.manager.snapshot().is_authenticated {
                    continue;
                }
                // Fail-open: one missed refresh is not fatal, the health
                // check catches persistent failure.
                if let Err(err) = guard.manager.refresh_session().await {
                    warn!("Periodic session refresh failed: {err}");
                }
            }
        }));
    }

    fn spawn_broadcast_listener(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut messages = self.manager.broadcast_channel().subscribe();
        self.track(tokio::spawn(async move {
            loop {
                let message = match messages.recv().await {
                    Ok(message) => message,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(missed, "Cross-tab channel lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                };
                let Some(guard) = weak.upgrade() else { return };
                match message {
                    SessionMessage::Updated(session) => {
                        guard.manager.adopt_announced(session);
                    }
                    SessionMessage::Cleared => {
                        guard
                            .manager
                            .force_unauthenticated(Some("Signed out in another tab"));
                        if !guard.on_shielded_path() {
                            guard.navigator.redirect(LOGIN_PATH);
                        }
                    }
                }
            }
        }));
    }

    fn spawn_enforcement(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut path_rx = self.path.subscribe();
        let mut loading_rx = self.loading.subscribe();
        self.track(tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = path_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    changed = loading_rx.changed() => {
                        if changed.is_err() || *loading_rx.borrow() != LoadingState::Idle {
                            continue;
                        }
                    }
                }
                let Some(guard) = weak.upgrade() else { return };
                guard.enforce();
            }
        }));
    }
}

impl<I, N> Drop for RouteGuard<I, N> {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
