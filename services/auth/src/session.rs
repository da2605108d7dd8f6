//! Session provider
//!
//! Keeps the process-wide view of who is signed in, mirrors every session
//! change reported by the gateway, and tells registered listeners about it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::json;
use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use common::{GatewayError, GatewayResult};
use gateway::{AuthSession, Filter, Gateway, Select, Table};

use crate::models::user::ProfileSummary;
use crate::models::{CurrentUser, LoginCredentials, SessionState, SignUpRequest};
use crate::validation;

type Listener = Arc<dyn Fn(&SessionState) + Send + Sync>;
type Listeners = Mutex<Vec<(u64, Listener)>>;

struct Inner {
    gateway: Arc<dyn Gateway>,
    state: RwLock<SessionState>,
    listeners: Arc<Listeners>,
    next_listener: AtomicU64,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

/// Provider of the current session
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct SessionProvider {
    inner: Arc<Inner>,
}

/// Registration of a session listener
///
/// The listener stays registered until the guard is dropped or disposed.
#[must_use = "the listener is removed when the guard is dropped"]
pub struct ListenerGuard {
    id: u64,
    listeners: Weak<Listeners>,
}

impl ListenerGuard {
    /// Remove the listener now
    pub fn dispose(self) {}
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl SessionProvider {
    /// Create a provider; call [`SessionProvider::start`] to load the session
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                state: RwLock::new(SessionState::initial()),
                listeners: Arc::new(Mutex::new(Vec::new())),
                next_listener: AtomicU64::new(0),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Restore the existing session and follow the gateway's session events
    /// until [`SessionProvider::shutdown`]
    pub async fn start(&self) -> GatewayResult<()> {
        let mut events = self.inner.gateway.subscribe();

        let restored = match self.inner.gateway.current_session().await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to restore session: {}", e);
                self.apply_session(None).await;
                return Err(e);
            }
        };
        self.apply_session(restored).await;

        let provider = self.clone();
        let watcher = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => debug!("Session event: {}", event.name()),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} session events, resynchronizing", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
                provider.sync().await;
            }
        });

        let previous = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(watcher);
        if let Some(previous) = previous {
            previous.abort();
        }

        info!("Session provider started");
        Ok(())
    }

    /// Stop following session events
    pub fn shutdown(&self) {
        let watcher = self
            .inner
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
            info!("Session provider stopped");
        }
    }

    /// Sign in with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<CurrentUser> {
        let credentials = LoginCredentials {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        validation::validate_credentials(&credentials).map_err(GatewayError::Validation)?;

        let session = self
            .inner
            .gateway
            .sign_in(&credentials.email, &credentials.password)
            .await?;
        self.apply_session(Some(session)).await;
        self.require_user().await
    }

    /// Register a new user
    ///
    /// Returns the signed-in user, or `None` when the backend asks for the
    /// email address to be confirmed first.
    pub async fn sign_up(&self, request: SignUpRequest) -> GatewayResult<Option<CurrentUser>> {
        validation::validate_sign_up(&request).map_err(GatewayError::Validation)?;

        let metadata = json!({
            "full_name": request.full_name.trim(),
            "avatar_url": request.avatar_url,
        });
        let outcome = self
            .inner
            .gateway
            .sign_up(request.email.trim(), &request.password, metadata)
            .await?;
        info!("Registered user: {}", outcome.user.id);

        match outcome.session {
            Some(session) => {
                self.apply_session(Some(session)).await;
                Ok(self.current_user().await)
            }
            None => Ok(None),
        }
    }

    /// Sign out; does nothing when no one is signed in
    ///
    /// Local state is cleared even when the backend cannot be reached.
    pub async fn sign_out(&self) -> GatewayResult<()> {
        let result = self.inner.gateway.sign_out().await;
        if let Err(e) = &result {
            warn!("Remote sign out failed: {}", e);
        }
        self.apply_session(None).await;
        result
    }

    /// Read the current user's profile again, e.g. after a role change
    pub async fn reload_user(&self) -> GatewayResult<Option<CurrentUser>> {
        let Some(session) = self.inner.state.read().await.session.clone() else {
            return Ok(None);
        };

        let user = self.resolve_user(&session).await;
        let snapshot = {
            let mut state = self.inner.state.write().await;
            if !same_session(state.session.as_ref(), Some(&session)) {
                return Ok(state.user.clone());
            }
            if state.user.as_ref() == Some(&user) {
                return Ok(Some(user));
            }
            state.user = Some(user.clone());
            state.clone()
        };
        self.notify(&snapshot);
        Ok(Some(user))
    }

    pub async fn state(&self) -> SessionState {
        self.inner.state.read().await.clone()
    }

    pub async fn current_user(&self) -> Option<CurrentUser> {
        self.inner.state.read().await.user.clone()
    }

    pub async fn is_admin(&self) -> bool {
        self.inner
            .state
            .read()
            .await
            .user
            .as_ref()
            .is_some_and(CurrentUser::is_admin)
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.state.read().await.loading
    }

    /// The current user, or an authentication error
    pub async fn require_user(&self) -> GatewayResult<CurrentUser> {
        self.current_user()
            .await
            .ok_or(GatewayError::AuthenticationRequired)
    }

    /// The current user if they are an admin
    pub async fn require_admin(&self) -> GatewayResult<CurrentUser> {
        let user = self.require_user().await?;
        if !user.is_admin() {
            return Err(GatewayError::denied("Administrator role required"));
        }
        Ok(user)
    }

    /// Call `listener` with the new state after every change
    ///
    /// Listeners run on the task that made the change, outside the state lock.
    pub fn subscribe<F>(&self, listener: F) -> ListenerGuard
    where
        F: Fn(&SessionState) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));

        ListenerGuard {
            id,
            listeners: Arc::downgrade(&self.inner.listeners),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn sync(&self) {
        match self.inner.gateway.current_session().await {
            Ok(session) => self.apply_session(session).await,
            Err(e) => warn!("Failed to read session after event: {}", e),
        }
    }

    async fn apply_session(&self, session: Option<AuthSession>) {
        {
            let state = self.inner.state.read().await;
            if !state.loading && same_session(state.session.as_ref(), session.as_ref()) {
                return;
            }
        }

        let user = match &session {
            Some(session) => Some(self.resolve_user(session).await),
            None => None,
        };

        let snapshot = {
            let mut state = self.inner.state.write().await;
            if !state.loading && same_session(state.session.as_ref(), session.as_ref()) {
                return;
            }
            state.session = session;
            state.user = user;
            state.loading = false;
            state.clone()
        };

        match &snapshot.user {
            Some(user) => info!("Session active for user: {} ({})", user.id, user.role),
            None => info!("No active session"),
        }
        self.notify(&snapshot);
    }

    /// Combine the auth identity with the role stored on the profile row
    async fn resolve_user(&self, session: &AuthSession) -> CurrentUser {
        let select = Select::from(Table::Profiles)
            .columns("full_name,role")
            .filter(Filter::new().eq("id", session.user.id.to_string()));

        let profile = match self.inner.gateway.select(&select).await {
            Ok(selection) => match selection.rows.into_iter().next() {
                Some(row) => serde_json::from_value::<ProfileSummary>(row).unwrap_or_else(|e| {
                    warn!("Unreadable profile for {}: {}", session.user.id, e);
                    ProfileSummary::default()
                }),
                None => {
                    warn!("No profile row for user: {}", session.user.id);
                    ProfileSummary::default()
                }
            },
            Err(e) => {
                warn!("Failed to load profile for {}: {}", session.user.id, e);
                ProfileSummary::default()
            }
        };

        let full_name = profile
            .full_name
            .filter(|name| !name.is_empty())
            .or_else(|| {
                session
                    .user
                    .user_metadata
                    .get("full_name")
                    .and_then(|name| name.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        CurrentUser {
            id: session.user.id,
            email: session.user.email.clone(),
            full_name,
            role: profile.role,
        }
    }

    fn notify(&self, state: &SessionState) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(state);
        }
    }
}

fn same_session(current: Option<&AuthSession>, next: Option<&AuthSession>) -> bool {
    match (current, next) {
        (Some(current), Some(next)) => current.access_token == next.access_token,
        (None, None) => true,
        _ => false,
    }
}
