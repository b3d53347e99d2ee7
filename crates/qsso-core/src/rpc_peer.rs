//! [`TokenPeer`] over a JSON-RPC connection to the language server.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use qsso_proto::v1::{
    AwsErrorCode, AwsResponseErrorData, GetSsoTokenParams, GetSsoTokenResult,
    InvalidateSsoTokenParams, ListProfilesResult, SsoTokenChangedParams, UpdateCredentialsParams,
    UpdateProfileParams, METHOD_DELETE_BEARER_TOKEN, METHOD_GET_SSO_TOKEN, METHOD_INVALIDATE_SSO_TOKEN,
    METHOD_LIST_PROFILES, METHOD_SSO_TOKEN_CHANGED, METHOD_UPDATE_BEARER_TOKEN, METHOD_UPDATE_PROFILE,
};
use qsso_transport::{RpcConnection, TransportError};

use crate::errors::PeerError;
use crate::peer::TokenPeer;

const TOKEN_CHANGED_CAPACITY: usize = 16;

pub struct RpcTokenPeer {
    connection: RpcConnection,
    changed: broadcast::Sender<SsoTokenChangedParams>,
    forwarder: JoinHandle<()>,
}

impl RpcTokenPeer {
    /// Wrap `connection`. Must be called inside a Tokio runtime; a task is
    /// spawned to decode `ssoTokenChanged` notifications.
    pub fn new(connection: RpcConnection) -> Self {
        let (changed, _) = broadcast::channel(TOKEN_CHANGED_CAPACITY);
        let raw = connection.subscribe(METHOD_SSO_TOKEN_CHANGED);
        let forwarder = tokio::spawn(forward_token_changed(raw, changed.clone()));
        Self {
            connection,
            changed,
            forwarder,
        }
    }

    pub fn connection(&self) -> &RpcConnection {
        &self.connection
    }

    async fn call<P, T>(
        &self,
        method: &str,
        params: &P,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, PeerError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.connection
            .call(method, params, cancel)
            .await
            .map_err(peer_error)
    }
}

impl Drop for RpcTokenPeer {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[async_trait]
impl TokenPeer for RpcTokenPeer {
    async fn get_sso_token(
        &self,
        params: GetSsoTokenParams,
        cancel: CancellationToken,
    ) -> Result<GetSsoTokenResult, PeerError> {
        self.call(METHOD_GET_SSO_TOKEN, &params, Some(&cancel)).await
    }

    async fn update_profile(&self, params: UpdateProfileParams) -> Result<(), PeerError> {
        let _: Value = self.call(METHOD_UPDATE_PROFILE, &params, None).await?;
        Ok(())
    }

    async fn list_profiles(&self) -> Result<ListProfilesResult, PeerError> {
        self.call(METHOD_LIST_PROFILES, &json!({}), None).await
    }

    async fn invalidate_sso_token(&self, token_id: &str) -> Result<(), PeerError> {
        let params = InvalidateSsoTokenParams {
            sso_token_id: token_id.to_string(),
        };
        let _: Value = self.call(METHOD_INVALIDATE_SSO_TOKEN, &params, None).await?;
        Ok(())
    }

    async fn update_bearer_token(&self, params: UpdateCredentialsParams) -> Result<(), PeerError> {
        let _: Value = self.call(METHOD_UPDATE_BEARER_TOKEN, &params, None).await?;
        Ok(())
    }

    async fn delete_bearer_token(&self) -> Result<(), PeerError> {
        self.connection
            .notify(METHOD_DELETE_BEARER_TOKEN, &Value::Null)
            .map_err(peer_error)
    }

    fn token_changed(&self) -> broadcast::Receiver<SsoTokenChangedParams> {
        self.changed.subscribe()
    }
}

async fn forward_token_changed(
    mut raw: broadcast::Receiver<Value>,
    changed: broadcast::Sender<SsoTokenChangedParams>,
) {
    loop {
        match raw.recv().await {
            Ok(value) => match serde_json::from_value::<SsoTokenChangedParams>(value) {
                Ok(params) => {
                    // No receivers is fine: nothing listens before the registry starts.
                    let _ = changed.send(params);
                }
                Err(e) => warn!(error = %e, "malformed ssoTokenChanged notification"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "ssoTokenChanged notifications dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("ssoTokenChanged stream closed");
                break;
            }
        }
    }
}

/// Map a transport failure to a peer error, lifting `data.awsErrorCode`
/// out of remote errors. Local cancellation is reported as `cancelled`.
pub fn peer_error(err: TransportError) -> PeerError {
    match err {
        TransportError::Cancelled => PeerError::with_code(AwsErrorCode::Cancelled, "request cancelled"),
        TransportError::Remote(remote) => {
            let code = remote
                .data
                .clone()
                .and_then(|data| serde_json::from_value::<AwsResponseErrorData>(data).ok())
                .map(|data| data.aws_error_code);
            PeerError {
                code,
                message: remote.message,
            }
        }
        other => PeerError::transport(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use qsso_proto::v1::SsoTokenChangedKind;
    use qsso_transport::testing::{connected_pair, FnHandler, NeverReply};
    use qsso_transport::{ConnectionOptions, RpcError};

    #[test]
    fn test_peer_error_mapping() {
        let remote = RpcError::new(-32603, "refresh failed")
            .with_data(json!({ "awsErrorCode": "E_CANNOT_REFRESH_SSO_TOKEN" }));
        let e = peer_error(TransportError::Remote(remote));
        assert_eq!(e.code, Some(AwsErrorCode::CannotRefreshSsoToken));
        assert_eq!(e.message, "refresh failed");

        let plain = peer_error(TransportError::Remote(RpcError::new(-32603, "boom")));
        assert_eq!(plain.code, None);

        assert!(peer_error(TransportError::Cancelled).is_cancelled());
        assert_eq!(peer_error(TransportError::Timeout).code, None);
    }

    #[tokio::test]
    async fn test_get_sso_token_round_trip() {
        let (client, server) = connected_pair(ConnectionOptions::default());
        server.set_request_handler(Arc::new(FnHandler::new(|method, params| {
            assert_eq!(method, METHOD_GET_SSO_TOKEN);
            let params = params.unwrap_or_default();
            assert_eq!(params["clientName"], "qsso-test");
            Ok(json!({
                "ssoToken": { "id": "tok-1", "accessToken": "envelope" },
                "updateCredentialsParams": { "data": "envelope", "encrypted": true }
            }))
        })));

        let peer = RpcTokenPeer::new(client);
        let params: GetSsoTokenParams = serde_json::from_value(json!({
            "clientName": "qsso-test",
            "source": { "kind": "IamIdentityCenter", "profileName": "q" },
            "options": { "loginOnInvalidToken": false }
        }))
        .unwrap();
        let result = peer
            .get_sso_token(params, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.sso_token.id, "tok-1");
        assert!(result.update_credentials_params.encrypted);
    }

    #[tokio::test]
    async fn test_remote_error_code_is_lifted() {
        let (client, server) = connected_pair(ConnectionOptions::default());
        server.set_request_handler(Arc::new(FnHandler::new(|_, _| {
            Err(RpcError::new(-32600, "no session")
                .with_data(json!({ "awsErrorCode": "E_SSO_SESSION_NOT_FOUND" })))
        })));

        let peer = RpcTokenPeer::new(client);
        let err = peer.invalidate_sso_token("tok-1").await.unwrap_err();
        assert_eq!(err.code, Some(AwsErrorCode::SsoSessionNotFound));
    }

    #[tokio::test]
    async fn test_cancel_maps_to_cancelled_code() {
        let (client, server) = connected_pair(ConnectionOptions::default());
        let (handler, seen) = NeverReply::new();
        server.set_request_handler(Arc::new(handler));

        let peer = Arc::new(RpcTokenPeer::new(client));
        let cancel = CancellationToken::new();
        let params: GetSsoTokenParams = serde_json::from_value(json!({
            "clientName": "qsso-test",
            "source": { "kind": "IamIdentityCenter", "profileName": "q" },
            "options": { "loginOnInvalidToken": true }
        }))
        .unwrap();

        let call = {
            let peer = Arc::clone(&peer);
            let cancel = cancel.clone();
            tokio::spawn(async move { peer.get_sso_token(params, cancel).await })
        };
        seen.notified().await;
        cancel.cancel();

        let err = call.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_token_changed_notifications_are_decoded() {
        let (client, server) = connected_pair(ConnectionOptions::default());
        let peer = RpcTokenPeer::new(client);
        let mut rx = peer.token_changed();

        server
            .notify(
                METHOD_SSO_TOKEN_CHANGED,
                &json!({ "kind": "Expired", "ssoTokenId": "tok-9" }),
            )
            .unwrap();

        let params = rx.recv().await.unwrap();
        assert_eq!(params.kind, SsoTokenChangedKind::Expired);
        assert_eq!(params.sso_token_id, "tok-9");
    }
}
