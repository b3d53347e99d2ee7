//! Contract between the auth core and the identity server.
//!
//! One method per verb the server understands. The production
//! implementation speaks JSON-RPC over the language-server pipes
//! ([`crate::rpc_peer`]); tests use [`crate::harness::ScriptedPeer`].

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use qsso_proto::v1::{
    GetSsoTokenParams, GetSsoTokenResult, ListProfilesResult, SsoTokenChangedParams,
    UpdateCredentialsParams, UpdateProfileParams,
};

use crate::errors::PeerError;

#[async_trait]
pub trait TokenPeer: Send + Sync {
    /// Fetch a token for `params.source`. Firing `cancel` abandons the
    /// request; the call then fails with the `cancelled` code.
    async fn get_sso_token(
        &self,
        params: GetSsoTokenParams,
        cancel: CancellationToken,
    ) -> Result<GetSsoTokenResult, PeerError>;

    /// Create or update the named profile and its linked SSO session.
    async fn update_profile(&self, params: UpdateProfileParams) -> Result<(), PeerError>;

    async fn list_profiles(&self) -> Result<ListProfilesResult, PeerError>;

    async fn invalidate_sso_token(&self, token_id: &str) -> Result<(), PeerError>;

    /// Hand the encrypted bearer token to the server's downstream features.
    async fn update_bearer_token(&self, params: UpdateCredentialsParams) -> Result<(), PeerError>;

    /// Tell the server's downstream features to drop the bearer token.
    async fn delete_bearer_token(&self) -> Result<(), PeerError>;

    /// Stream of `ssoTokenChanged` notifications.
    fn token_changed(&self) -> broadcast::Receiver<SsoTokenChangedParams>;
}
