//! Test harness for qsso core.
//!
//! [`ScriptedPeer`] stands in for the identity server: token replies are
//! queued up front, every call is recorded, and `ssoTokenChanged`
//! notifications can be injected. [`RecordingDependents`] captures the
//! registry's UI-side hooks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

use qsso_crypto::token_envelope::seal_access_token;
use qsso_crypto::ChannelKey;
use qsso_proto::v1::{
    AwsErrorCode, GetSsoTokenParams, GetSsoTokenResult, ListProfilesResult, SsoToken,
    SsoTokenChangedKind, SsoTokenChangedParams, UpdateCredentialsParams, UpdateProfileParams,
};

use crate::errors::PeerError;
use crate::peer::TokenPeer;
use crate::registry::{Dependents, VisibilityFlags};
use crate::types::AuthState;

/// Fixed channel key shared by [`ScriptedPeer`] and the sessions under test.
pub fn test_key() -> ChannelKey {
    ChannelKey::from_bytes([7u8; 32])
}

// ============================================================================
// Scripted peer
// ============================================================================

/// How the peer answers one `getSsoToken` call.
#[derive(Clone, Debug)]
pub enum TokenReply {
    Token { id: String, bearer: String },
    Error(AwsErrorCode),
    /// Fail without a token-domain code
    Transport(String),
    /// Never answer; resolve as `cancelled` once the caller cancels
    Hang,
    /// Answer with the inner reply after a pause
    Delayed(Duration, Box<TokenReply>),
}

impl TokenReply {
    pub fn token(id: &str, bearer: &str) -> Self {
        TokenReply::Token {
            id: id.to_string(),
            bearer: bearer.to_string(),
        }
    }

    pub fn delayed(pause: Duration, reply: TokenReply) -> Self {
        TokenReply::Delayed(pause, Box::new(reply))
    }
}

#[derive(Default)]
struct Calls {
    token_requests: Vec<GetSsoTokenParams>,
    update_profile: Vec<UpdateProfileParams>,
    invalidated: Vec<String>,
    bearer_updates: Vec<UpdateCredentialsParams>,
    bearer_deletes: usize,
}

pub struct ScriptedPeer {
    key: ChannelKey,
    replies: Mutex<VecDeque<TokenReply>>,
    fallback: Mutex<TokenReply>,
    profiles: Mutex<ListProfilesResult>,
    calls: Mutex<Calls>,
    fail_invalidate: Mutex<bool>,
    fail_list_profiles: Mutex<bool>,
    hang_started: Notify,
    changed: broadcast::Sender<SsoTokenChangedParams>,
}

impl ScriptedPeer {
    /// A peer that answers every token request with `tok-1` / `bearer-1`
    /// unless replies are queued.
    pub fn new(key: ChannelKey) -> Self {
        let (changed, _) = broadcast::channel(16);
        Self {
            key,
            replies: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(TokenReply::token("tok-1", "bearer-1")),
            profiles: Mutex::new(ListProfilesResult::default()),
            calls: Mutex::new(Calls::default()),
            fail_invalidate: Mutex::new(false),
            fail_list_profiles: Mutex::new(false),
            hang_started: Notify::new(),
            changed,
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new(test_key()))
    }

    // -------------------------------------------------------------------------
    // Scripting
    // -------------------------------------------------------------------------

    pub fn push_reply(&self, reply: TokenReply) {
        self.replies.lock().push_back(reply);
    }

    /// Reply used once the queue is empty.
    pub fn set_fallback(&self, reply: TokenReply) {
        *self.fallback.lock() = reply;
    }

    pub fn set_profile(&self, name: &str, start_url: &str, region: &str, scopes: Vec<String>) {
        self.upsert_profile(UpdateProfileParams::sso(name, start_url, region, scopes));
    }

    pub fn fail_invalidate(&self, fail: bool) {
        *self.fail_invalidate.lock() = fail;
    }

    pub fn fail_list_profiles(&self, fail: bool) {
        *self.fail_list_profiles.lock() = fail;
    }

    /// Inject an `ssoTokenChanged` notification.
    pub fn emit_token_changed(&self, kind: SsoTokenChangedKind, token_id: &str) {
        let _ = self.changed.send(SsoTokenChangedParams {
            kind,
            sso_token_id: token_id.to_string(),
        });
    }

    /// Resolves once a [`TokenReply::Hang`] request is in flight.
    pub async fn wait_for_hang(&self) {
        self.hang_started.notified().await;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn token_requests(&self) -> Vec<GetSsoTokenParams> {
        self.calls.lock().token_requests.clone()
    }

    pub fn last_token_request(&self) -> Option<GetSsoTokenParams> {
        self.calls.lock().token_requests.last().cloned()
    }

    pub fn update_profile_calls(&self) -> Vec<UpdateProfileParams> {
        self.calls.lock().update_profile.clone()
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.calls.lock().invalidated.clone()
    }

    pub fn bearer_updates(&self) -> Vec<UpdateCredentialsParams> {
        self.calls.lock().bearer_updates.clone()
    }

    pub fn bearer_deletes(&self) -> usize {
        self.calls.lock().bearer_deletes
    }

    fn upsert_profile(&self, params: UpdateProfileParams) {
        let mut listing = self.profiles.lock();
        listing.profiles.retain(|p| p.name != params.profile.name);
        listing.profiles.push(params.profile);
        if let Some(session) = params.sso_session {
            listing.sso_sessions.retain(|s| s.name != session.name);
            listing.sso_sessions.push(session);
        }
    }

    fn next_reply(&self) -> TokenReply {
        match self.replies.lock().pop_front() {
            Some(reply) => reply,
            None => self.fallback.lock().clone(),
        }
    }
}

#[async_trait]
impl TokenPeer for ScriptedPeer {
    async fn get_sso_token(
        &self,
        params: GetSsoTokenParams,
        cancel: CancellationToken,
    ) -> Result<GetSsoTokenResult, PeerError> {
        self.calls.lock().token_requests.push(params);
        let mut reply = self.next_reply();
        while let TokenReply::Delayed(pause, inner) = reply {
            tokio::time::sleep(pause).await;
            reply = *inner;
        }
        match reply {
            TokenReply::Token { id, bearer } => {
                let sealed = seal_access_token(&self.key, &bearer)
                    .map_err(|e| PeerError::transport(e.to_string()))?;
                Ok(GetSsoTokenResult {
                    sso_token: SsoToken {
                        id,
                        access_token: sealed.clone(),
                    },
                    update_credentials_params: UpdateCredentialsParams {
                        data: sealed,
                        encrypted: true,
                    },
                })
            }
            TokenReply::Error(code) => Err(PeerError::with_code(code, "scripted failure")),
            TokenReply::Transport(message) => Err(PeerError::transport(message)),
            TokenReply::Hang => {
                self.hang_started.notify_one();
                cancel.cancelled().await;
                Err(PeerError::with_code(AwsErrorCode::Cancelled, "request cancelled"))
            }
            // Unwrapped by the loop above.
            TokenReply::Delayed(..) => Err(PeerError::transport("unresolved delayed reply")),
        }
    }

    async fn update_profile(&self, params: UpdateProfileParams) -> Result<(), PeerError> {
        self.calls.lock().update_profile.push(params.clone());
        self.upsert_profile(params);
        Ok(())
    }

    async fn list_profiles(&self) -> Result<ListProfilesResult, PeerError> {
        if *self.fail_list_profiles.lock() {
            return Err(PeerError::transport("listProfiles unavailable"));
        }
        Ok(self.profiles.lock().clone())
    }

    async fn invalidate_sso_token(&self, token_id: &str) -> Result<(), PeerError> {
        self.calls.lock().invalidated.push(token_id.to_string());
        if *self.fail_invalidate.lock() {
            return Err(PeerError::transport("invalidate failed"));
        }
        Ok(())
    }

    async fn update_bearer_token(&self, params: UpdateCredentialsParams) -> Result<(), PeerError> {
        self.calls.lock().bearer_updates.push(params);
        Ok(())
    }

    async fn delete_bearer_token(&self) -> Result<(), PeerError> {
        self.calls.lock().bearer_deletes += 1;
        Ok(())
    }

    fn token_changed(&self) -> broadcast::Receiver<SsoTokenChangedParams> {
        self.changed.subscribe()
    }
}

// ============================================================================
// Recording dependents
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DependentCall {
    Onboarding,
    Visibility(VisibilityFlags),
    Presentation(AuthState),
    Customizations,
}

/// [`Dependents`] that records every hook invocation in order.
#[derive(Default)]
pub struct RecordingDependents {
    calls: Mutex<Vec<DependentCall>>,
}

impl RecordingDependents {
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<DependentCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &DependentCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }
}

#[async_trait]
impl Dependents for RecordingDependents {
    async fn show_onboarding(&self) {
        self.calls.lock().push(DependentCall::Onboarding);
    }

    async fn set_visibility(&self, flags: VisibilityFlags) {
        self.calls.lock().push(DependentCall::Visibility(flags));
    }

    async fn refresh_presentation(&self, state: AuthState) {
        self.calls.lock().push(DependentCall::Presentation(state));
    }

    async fn notify_new_customizations(&self) {
        self.calls.lock().push(DependentCall::Customizations);
    }
}
