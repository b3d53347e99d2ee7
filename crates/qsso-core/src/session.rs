//! SSO connection session.
//!
//! One [`SsoSession`] tracks the single SSO connection of a feature profile:
//! its attributes, the handle of the last issued token and the
//! `notConnected` / `connected` / `expired` state. Every token fetch goes
//! through one protocol that maps the identity server's error codes onto
//! state transitions.
//!
//! State lives behind a mutex that is never held across an `.await`.
//! Transitions and the events announcing them happen under that lock, so
//! subscribers see events in transition order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use qsso_crypto::{decrypt_access_token, ChannelKey, PlaintextToken};
use qsso_proto::v1::{
    AwsErrorCode, GetSsoTokenOptions, GetSsoTokenParams, GetSsoTokenResult, SsoTokenSource,
    UpdateCredentialsParams, UpdateProfileParams,
};
use qsso_proto::validation::{validate_region, validate_scopes, validate_start_url};

use crate::errors::{AuthError, PeerError};
use crate::events::EVENT_CAPACITY;
use crate::peer::TokenPeer;
use crate::types::{
    is_builder_id, AuthEventState, AuthState, AuthStateEvent, SsoConnection, BUILDER_ID_REGION,
    BUILDER_ID_START_URL,
};

// ============================================================================
// Configuration & Results
// ============================================================================

/// Identity of the session towards the identity server.
#[derive(Clone, Debug)]
pub struct SsoSessionConfig {
    /// Profile the connection is registered under
    pub profile_name: String,
    /// Requester identity sent with every token request
    pub client_name: String,
    /// Scopes used when restoring a Builder ID connection
    pub scopes: Vec<String>,
}

/// A decrypted bearer token plus the material to push downstream.
#[derive(Clone)]
pub struct TokenBundle {
    pub token: PlaintextToken,
    pub update_credentials: UpdateCredentialsParams,
}

impl std::fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBundle")
            .field("token", &"<redacted>")
            .field("update_credentials", &self.update_credentials)
            .finish()
    }
}

/// Result of a start-up restore. Restore never fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// A cached token was found; the session is connected
    Restored,
    /// A session exists but its token can no longer be refreshed
    Expired,
    /// Nothing to restore
    NoSession,
    /// The server could not be asked
    TransportFailure(String),
}

// ============================================================================
// Session
// ============================================================================

struct InFlight {
    seq: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Inner {
    state: AuthState,
    connection: Option<SsoConnection>,
    token_id: Option<String>,
    /// Cancellation handle of the current interactive request
    in_flight: Option<InFlight>,
    /// Bumped by login and logout; fetches started in an older epoch
    /// must not touch the state
    epoch: u64,
}

pub struct SsoSession {
    config: SsoSessionConfig,
    peer: Arc<dyn TokenPeer>,
    key: ChannelKey,
    inner: Mutex<Inner>,
    next_seq: AtomicU64,
    events: broadcast::Sender<AuthStateEvent>,
}

impl SsoSession {
    pub fn new(config: SsoSessionConfig, peer: Arc<dyn TokenPeer>, key: ChannelKey) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            peer,
            key,
            inner: Mutex::new(Inner::default()),
            next_seq: AtomicU64::new(1),
            events,
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn profile_name(&self) -> &str {
        &self.config.profile_name
    }

    pub fn auth_state(&self) -> AuthState {
        self.inner.lock().state
    }

    /// Current connection attributes, with the latest token handle.
    pub fn connection(&self) -> Option<SsoConnection> {
        let inner = self.inner.lock();
        inner.connection.clone().map(|mut c| {
            c.token_id = inner.token_id.clone();
            c
        })
    }

    pub fn token_id(&self) -> Option<String> {
        self.inner.lock().token_id.clone()
    }

    pub fn is_builder_id(&self) -> bool {
        self.inner
            .lock()
            .connection
            .as_ref()
            .map(SsoConnection::is_builder_id)
            .unwrap_or(false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthStateEvent> {
        self.events.subscribe()
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Interactive login. IdC start URLs are registered as the session's
    /// profile first; Builder ID needs no registration.
    pub async fn login(
        &self,
        start_url: &str,
        region: &str,
        scopes: Vec<String>,
    ) -> Result<SsoConnection, AuthError> {
        validate_start_url(start_url)?;
        validate_region(region)?;
        validate_scopes(&scopes)?;
        self.inner.lock().epoch += 1;

        if !is_builder_id(start_url) {
            let params = UpdateProfileParams::sso(
                &self.config.profile_name,
                start_url,
                region,
                scopes.clone(),
            );
            self.peer.update_profile(params).await?;
            debug!(profile = %self.config.profile_name, start_url, "profile registered");
        }

        let connection = SsoConnection::new(&self.config.profile_name, start_url, region, scopes);
        let source = self.source_for(Some(&connection));
        let result = self.fetch_token(source, true, Some(connection)).await?;

        info!(
            profile = %self.config.profile_name,
            start_url,
            token_id = %result.sso_token.id,
            "logged in"
        );
        self.connection().ok_or(AuthError::NoSession)
    }

    /// Repeat the interactive token request for the stored connection.
    pub async fn reauthenticate(&self) -> Result<(), AuthError> {
        let source = {
            let inner = self.inner.lock();
            if inner.state == AuthState::NotConnected {
                return Err(AuthError::NotConnected);
            }
            self.source_for(inner.connection.as_ref())
        };
        self.fetch_token(source, true, None).await?;
        Ok(())
    }

    /// Pick up a connection left by an earlier run without prompting.
    pub async fn restore(&self) -> RestoreOutcome {
        let connection = match self.peer.list_profiles().await {
            Ok(listing) => Some(self.restored_connection(&listing)),
            Err(e) => {
                warn!(profile = %self.config.profile_name, error = %e, "could not list profiles");
                None
            }
        };
        let source = self.source_for(connection.as_ref());

        match self.fetch_token(source, false, connection).await {
            Ok(_) => {
                info!(profile = %self.config.profile_name, "session restored");
                RestoreOutcome::Restored
            }
            Err(AuthError::Peer(e)) => match e.code {
                Some(AwsErrorCode::CannotRefreshSsoToken) => RestoreOutcome::Expired,
                Some(AwsErrorCode::Other(_)) | None => {
                    warn!(profile = %self.config.profile_name, error = %e, "restore failed");
                    RestoreOutcome::TransportFailure(e.to_string())
                }
                Some(_) => {
                    debug!(profile = %self.config.profile_name, error = %e, "no session to restore");
                    RestoreOutcome::NoSession
                }
            },
            Err(e) => RestoreOutcome::TransportFailure(e.to_string()),
        }
    }

    /// Invalidate the current token (best effort) and forget the connection.
    pub async fn logout(&self) {
        if let Some(token_id) = self.token_id() {
            if let Err(e) = self.peer.invalidate_sso_token(&token_id).await {
                warn!(profile = %self.config.profile_name, error = %e, "failed to invalidate token");
            }
        }

        let mut inner = self.inner.lock();
        inner.epoch += 1;
        if let Some(flight) = inner.in_flight.take() {
            flight.cancel.cancel();
        }
        inner.connection = None;
        inner.token_id = None;
        self.transition(&mut inner, AuthState::NotConnected);
        info!(profile = %self.config.profile_name, "logged out");
    }

    /// Fetch and decrypt a bearer token without prompting.
    pub async fn get_token(&self) -> Result<TokenBundle, AuthError> {
        let source = {
            let inner = self.inner.lock();
            if inner.state == AuthState::NotConnected {
                return Err(AuthError::NoSession);
            }
            self.source_for(inner.connection.as_ref())
        };
        let result = self.fetch_token(source, false, None).await?;
        let token = decrypt_access_token(&self.key, &result.sso_token.access_token)?;
        Ok(TokenBundle {
            token,
            update_credentials: result.update_credentials_params,
        })
    }

    /// Cancel the most recent interactive request, if one is still running.
    pub fn cancel_login(&self) {
        if let Some(flight) = self.inner.lock().in_flight.take() {
            debug!(profile = %self.config.profile_name, seq = flight.seq, "cancelling login");
            flight.cancel.cancel();
        }
    }

    // -------------------------------------------------------------------------
    // Notification hooks
    // -------------------------------------------------------------------------

    /// Move to `expired` if `token_id` is the current handle.
    pub(crate) fn expire_if_current(&self, token_id: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.token_id.as_deref() != Some(token_id) {
            return false;
        }
        self.transition(&mut inner, AuthState::Expired);
        true
    }

    /// Announce a refresh if `token_id` is the current handle.
    pub(crate) fn signal_refresh_if_current(&self, token_id: &str) -> bool {
        let inner = self.inner.lock();
        if inner.token_id.as_deref() != Some(token_id) {
            return false;
        }
        self.emit(AuthEventState::Refreshed);
        true
    }

    // -------------------------------------------------------------------------
    // Token-fetch protocol
    // -------------------------------------------------------------------------

    fn source_for(&self, connection: Option<&SsoConnection>) -> SsoTokenSource {
        match connection {
            Some(c) if c.is_builder_id() => SsoTokenSource::AwsBuilderId {
                sso_registration_scopes: c.scope_list(),
            },
            _ => SsoTokenSource::IamIdentityCenter {
                profile_name: self.config.profile_name.clone(),
            },
        }
    }

    /// Rebuild connection attributes from the server's profile listing. A
    /// profile that is missing or not linked to an IdC session is taken to be
    /// a Builder ID connection.
    fn restored_connection(&self, listing: &qsso_proto::v1::ListProfilesResult) -> SsoConnection {
        let settings = listing
            .profile_with_session(&self.config.profile_name)
            .and_then(|(_, session)| session)
            .and_then(|session| session.settings.as_ref());

        match settings {
            Some(s) => SsoConnection::new(
                &self.config.profile_name,
                &s.sso_start_url,
                &s.sso_region,
                s.sso_registration_scopes.clone().unwrap_or_default(),
            ),
            None => SsoConnection::new(
                &self.config.profile_name,
                BUILDER_ID_START_URL,
                BUILDER_ID_REGION,
                self.config.scopes.clone(),
            ),
        }
    }

    async fn fetch_token(
        &self,
        source: SsoTokenSource,
        interactive: bool,
        attributes: Option<SsoConnection>,
    ) -> Result<GetSsoTokenResult, AuthError> {
        let cancel = CancellationToken::new();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let epoch = {
            let mut inner = self.inner.lock();
            if interactive {
                let prior = inner.in_flight.replace(InFlight {
                    seq,
                    cancel: cancel.clone(),
                });
                if let Some(prior) = prior {
                    debug!(seq = prior.seq, "superseding in-flight login");
                    prior.cancel.cancel();
                }
            }
            inner.epoch
        };

        let params = GetSsoTokenParams {
            client_name: self.config.client_name.clone(),
            source,
            options: GetSsoTokenOptions {
                login_on_invalid_token: interactive,
            },
        };
        debug!(seq, interactive, "requesting sso token");
        let result = self.peer.get_sso_token(params, cancel).await;

        let mut inner = self.inner.lock();
        if inner.in_flight.as_ref().map(|f| f.seq) == Some(seq) {
            inner.in_flight = None;
        }

        if inner.epoch != epoch {
            debug!(seq, "discarding token fetch from before login or logout");
            return match result {
                Ok(_) => Err(AuthError::NoSession),
                Err(e) => Err(AuthError::Peer(e)),
            };
        }

        match result {
            Ok(result) => {
                if let Some(connection) = attributes {
                    inner.connection = Some(connection);
                }
                inner.token_id = Some(result.sso_token.id.clone());
                self.transition(&mut inner, AuthState::Connected);
                Ok(result)
            }
            Err(e) => {
                self.apply_fetch_error(&mut inner, &e);
                Err(AuthError::Peer(e))
            }
        }
    }

    fn apply_fetch_error(&self, inner: &mut Inner, err: &PeerError) {
        match &err.code {
            Some(
                AwsErrorCode::Cancelled
                | AwsErrorCode::SsoSessionNotFound
                | AwsErrorCode::ProfileNotFound
                | AwsErrorCode::InvalidSsoToken,
            ) => {
                inner.connection = None;
                inner.token_id = None;
                self.transition(inner, AuthState::NotConnected);
            }
            Some(AwsErrorCode::CannotRefreshSsoToken) => self.transition(inner, AuthState::Expired),
            Some(AwsErrorCode::Other(_)) | None => {
                error!(
                    profile = %self.config.profile_name,
                    error = %err,
                    "unknown error when requesting token"
                );
            }
        }
    }

    fn transition(&self, inner: &mut Inner, next: AuthState) {
        if inner.state == next {
            return;
        }
        info!(
            profile = %self.config.profile_name,
            from = %inner.state,
            to = %next,
            "auth state changed"
        );
        inner.state = next;
        self.emit(AuthEventState::Changed(next));
    }

    fn emit(&self, state: AuthEventState) {
        let _ = self.events.send(AuthStateEvent {
            id: self.config.profile_name.clone(),
            state,
        });
    }
}
