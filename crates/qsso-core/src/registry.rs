//! Auth registry: the single entry point feature code uses for auth.
//!
//! The registry owns the session of one feature profile, forwards token
//! requests to it, and reacts to its state changes: it keeps the server's
//! pushed bearer token in sync, recomputes UI visibility through
//! [`Dependents`], and republishes the change as a [`ConnectionStateEvent`].
//!
//! Side effects of state changes run on one listener task, in the order the
//! session emitted the changes.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use qsso_crypto::ChannelKey;

use crate::errors::AuthError;
use crate::events::{EventBus, Subscription};
use crate::migration::{migrate_legacy_profiles, MigrationContext, MigrationOutcome};
use crate::notifications::NotificationBridge;
use crate::peer::TokenPeer;
use crate::session::{RestoreOutcome, SsoSession, SsoSessionConfig, TokenBundle};
use crate::store::StateStore;
use crate::types::{
    AuthEventState, AuthState, AuthStateEvent, Connection, ConnectionKind, ConnectionStateEvent,
    IamConnection, SsoConnection,
};

/// State key recording that first-run onboarding was shown.
pub const ONBOARDING_KEY: &str = "qsso.hasShownOnboarding";

// ============================================================================
// Dependents
// ============================================================================

/// UI-facing flags derived from the connection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VisibilityFlags {
    pub connected: bool,
    pub expired: bool,
    pub show_login_view: bool,
    pub connected_idc: bool,
}

impl VisibilityFlags {
    pub fn for_state(state: AuthState, idc: bool) -> Self {
        let connected = state == AuthState::Connected;
        Self {
            connected,
            expired: state == AuthState::Expired,
            show_login_view: !connected,
            connected_idc: connected && idc,
        }
    }
}

/// Hooks the registry calls into on the presentation side.
#[async_trait]
pub trait Dependents: Send + Sync {
    /// First successful login of this installation.
    async fn show_onboarding(&self);

    async fn set_visibility(&self, flags: VisibilityFlags);

    async fn refresh_presentation(&self, state: AuthState);

    /// An IdC connection came up; its customizations may have changed.
    async fn notify_new_customizations(&self);
}

/// Dependents for headless use.
pub struct NoopDependents;

#[async_trait]
impl Dependents for NoopDependents {
    async fn show_onboarding(&self) {}
    async fn set_visibility(&self, _flags: VisibilityFlags) {}
    async fn refresh_presentation(&self, _state: AuthState) {}
    async fn notify_new_customizations(&self) {}
}

// ============================================================================
// Sessions
// ============================================================================

/// IAM credential session. Only identifies itself; bearer-token operations
/// are not available.
#[derive(Clone, Debug)]
pub struct IamSession {
    profile_name: String,
}

impl IamSession {
    pub fn new(profile_name: &str) -> Self {
        Self {
            profile_name: profile_name.to_string(),
        }
    }

    pub fn connection(&self) -> IamConnection {
        IamConnection {
            id: self.profile_name.clone(),
        }
    }
}

pub enum AuthSession {
    Sso(Arc<SsoSession>),
    Iam(IamSession),
}

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    pub profile_name: String,
    pub client_name: String,
    /// Scopes the feature requires
    pub scopes: Vec<String>,
    /// Directory holding token and registration cache files
    pub sso_cache_dir: PathBuf,
    pub kind: ConnectionKind,
}

// ============================================================================
// Registry
// ============================================================================

pub struct AuthRegistry {
    config: RegistryConfig,
    session: AuthSession,
    peer: Arc<dyn TokenPeer>,
    store: Arc<dyn StateStore>,
    dependents: Arc<dyn Dependents>,
    events: EventBus<ConnectionStateEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
    _bridge: Option<NotificationBridge>,
}

impl AuthRegistry {
    /// Build the registry and start its listener and notification bridge.
    /// Must be called inside a Tokio runtime.
    pub fn start(
        config: RegistryConfig,
        peer: Arc<dyn TokenPeer>,
        key: ChannelKey,
        store: Arc<dyn StateStore>,
        dependents: Arc<dyn Dependents>,
    ) -> Arc<Self> {
        let session = match config.kind {
            ConnectionKind::Sso => AuthSession::Sso(Arc::new(SsoSession::new(
                SsoSessionConfig {
                    profile_name: config.profile_name.clone(),
                    client_name: config.client_name.clone(),
                    scopes: config.scopes.clone(),
                },
                Arc::clone(&peer),
                key,
            ))),
            ConnectionKind::Iam => AuthSession::Iam(IamSession::new(&config.profile_name)),
        };
        let bridge = match &session {
            AuthSession::Sso(s) => Some(NotificationBridge::spawn(Arc::clone(s), peer.token_changed())),
            AuthSession::Iam(_) => None,
        };

        let registry = Arc::new(Self {
            config,
            session,
            peer,
            store,
            dependents,
            events: EventBus::default(),
            listener: Mutex::new(None),
            _bridge: bridge,
        });

        if let AuthSession::Sso(session) = &registry.session {
            let task = tokio::spawn(run_listener(Arc::downgrade(&registry), session.subscribe()));
            *registry.listener.lock() = Some(task);
        }
        info!(profile = %registry.config.profile_name, kind = ?registry.config.kind, "auth registry started");
        registry
    }

    fn sso(&self, operation: &'static str) -> Result<&Arc<SsoSession>, AuthError> {
        match &self.session {
            AuthSession::Sso(s) => Ok(s),
            AuthSession::Iam(_) => Err(AuthError::Unsupported(operation)),
        }
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    pub async fn login(
        &self,
        start_url: &str,
        region: &str,
        scopes: Vec<String>,
    ) -> Result<SsoConnection, AuthError> {
        let connection = self.sso("login")?.login(start_url, region, scopes).await?;
        self.maybe_show_onboarding().await;
        Ok(connection)
    }

    pub async fn reauthenticate(&self) -> Result<(), AuthError> {
        self.sso("reauthenticate")?.reauthenticate().await
    }

    pub async fn relogin(&self) -> Result<(), AuthError> {
        self.reauthenticate().await
    }

    pub fn cancel_login(&self) {
        if let AuthSession::Sso(s) = &self.session {
            s.cancel_login();
        }
    }

    /// Log the session out. The pushed bearer token is withdrawn when the
    /// listener sees the `notConnected` transition.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.sso("logout")?.logout().await;
        Ok(())
    }

    pub async fn get_token(&self) -> Result<TokenBundle, AuthError> {
        self.sso("bearer token")?.get_token().await
    }

    /// Import legacy state, then pick up any session left by an earlier run.
    pub async fn restore(&self) -> RestoreOutcome {
        let AuthSession::Sso(session) = &self.session else {
            return RestoreOutcome::NoSession;
        };
        match self.migrate_legacy().await {
            Ok(outcome) => debug!(?outcome, "legacy migration finished"),
            Err(e) => warn!(error = %e, "legacy migration failed"),
        }
        session.restore().await
    }

    pub async fn migrate_legacy(&self) -> Result<MigrationOutcome, AuthError> {
        let ctx = MigrationContext {
            peer: self.peer.as_ref(),
            store: self.store.as_ref(),
            profile_name: &self.config.profile_name,
            client_name: &self.config.client_name,
            required_scopes: &self.config.scopes,
            cache_dir: &self.config.sso_cache_dir,
        };
        migrate_legacy_profiles(&ctx).await
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn auth_state(&self) -> AuthState {
        match &self.session {
            AuthSession::Sso(s) => s.auth_state(),
            AuthSession::Iam(_) => AuthState::NotConnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.auth_state() == AuthState::Connected
    }

    pub fn is_connection_expired(&self) -> bool {
        self.auth_state() == AuthState::Expired
    }

    pub fn is_sso_session(&self) -> bool {
        matches!(self.session, AuthSession::Sso(_))
    }

    pub fn is_builder_id_connection(&self) -> bool {
        matches!(self.connection(), Some(Connection::Sso(c)) if c.is_builder_id())
    }

    pub fn is_idc_connection(&self) -> bool {
        matches!(self.connection(), Some(Connection::Sso(c)) if !c.is_builder_id())
    }

    pub fn connection(&self) -> Option<Connection> {
        match &self.session {
            AuthSession::Sso(s) => s.connection().map(Connection::Sso),
            AuthSession::Iam(s) => Some(Connection::Iam(s.connection())),
        }
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStateEvent> {
        self.events.subscribe()
    }

    /// Call `handler` for every republished state change until the returned
    /// subscription is dropped.
    pub fn on_did_change_connection_state<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ConnectionStateEvent) + Send + 'static,
    {
        self.events.on(handler)
    }

    // -------------------------------------------------------------------------
    // State-change handling
    // -------------------------------------------------------------------------

    async fn handle_session_event(&self, event: AuthStateEvent) {
        match event.state {
            AuthEventState::Refreshed => self.push_bearer_token().await,
            AuthEventState::Changed(state) => self.refresh_state(event.id, state).await,
        }
    }

    async fn refresh_state(&self, id: String, state: AuthState) {
        match state {
            AuthState::Connected => self.push_bearer_token().await,
            AuthState::Expired | AuthState::NotConnected => {
                if let Err(e) = self.peer.delete_bearer_token().await {
                    warn!(error = %e, "failed to withdraw bearer token");
                }
            }
        }

        let idc = self.is_idc_connection();
        self.dependents
            .set_visibility(VisibilityFlags::for_state(state, idc))
            .await;
        self.dependents.refresh_presentation(state).await;
        if state == AuthState::Connected && idc {
            self.dependents.notify_new_customizations().await;
        }

        self.events.publish(ConnectionStateEvent { id, state });
    }

    async fn push_bearer_token(&self) {
        match self.get_token().await {
            Ok(_) if self.auth_state() != AuthState::Connected => {
                debug!("session left connected state, bearer token not pushed");
            }
            Ok(bundle) => {
                if let Err(e) = self.peer.update_bearer_token(bundle.update_credentials).await {
                    warn!(error = %e, "failed to push bearer token");
                }
            }
            Err(e) => warn!(error = %e, "no bearer token to push"),
        }
    }

    async fn maybe_show_onboarding(&self) {
        match self.store.get_bool(ONBOARDING_KEY).await {
            Ok(true) => {}
            Ok(false) => {
                self.dependents.show_onboarding().await;
                if let Err(e) = self.store.set(ONBOARDING_KEY, Value::Bool(true)).await {
                    warn!(error = %e, "failed to record onboarding");
                }
            }
            Err(e) => warn!(error = %e, "failed to read onboarding flag"),
        }
    }
}

impl Drop for AuthRegistry {
    fn drop(&mut self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
    }
}

async fn run_listener(registry: Weak<AuthRegistry>, mut events: broadcast::Receiver<AuthStateEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "auth state events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(registry) = registry.upgrade() else {
            break;
        };
        registry.handle_session_event(event).await;
    }
}

// ============================================================================
// Registry cell
// ============================================================================

/// Holds the registry once the composition root has built it. Asking early
/// fails fast with [`AuthError::NotReady`].
#[derive(Default)]
pub struct RegistryCell {
    inner: OnceLock<Arc<AuthRegistry>>,
}

impl RegistryCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the registry. Fails, handing it back, if one is already set.
    pub fn set(&self, registry: Arc<AuthRegistry>) -> Result<(), Arc<AuthRegistry>> {
        self.inner.set(registry)
    }

    pub fn get(&self) -> Result<Arc<AuthRegistry>, AuthError> {
        self.inner.get().cloned().ok_or(AuthError::NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.get().is_some()
    }
}
