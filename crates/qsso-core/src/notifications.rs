//! Bridge from `ssoTokenChanged` notifications to session state.
//!
//! Notifications name a token handle. Only the session's current handle is
//! acted on; anything else is stale and dropped.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use qsso_proto::v1::{SsoTokenChangedKind, SsoTokenChangedParams};

use crate::session::SsoSession;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The session moved to `expired` (or already was)
    Expired,
    /// A refresh event was emitted
    Refreshed,
    /// The handle did not match the current token
    Ignored,
}

pub fn apply_token_changed(session: &SsoSession, params: &SsoTokenChangedParams) -> BridgeOutcome {
    let applied = match params.kind {
        SsoTokenChangedKind::Expired => session
            .expire_if_current(&params.sso_token_id)
            .then_some(BridgeOutcome::Expired),
        SsoTokenChangedKind::Refreshed => session
            .signal_refresh_if_current(&params.sso_token_id)
            .then_some(BridgeOutcome::Refreshed),
    };
    applied.unwrap_or_else(|| {
        debug!(
            profile = session.profile_name(),
            token_id = %params.sso_token_id,
            "ignoring token change for another token"
        );
        BridgeOutcome::Ignored
    })
}

/// Task feeding a notification stream into one session.
pub struct NotificationBridge {
    task: JoinHandle<()>,
}

impl NotificationBridge {
    pub fn spawn(
        session: Arc<SsoSession>,
        mut notifications: broadcast::Receiver<SsoTokenChangedParams>,
    ) -> Self {
        let task = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(params) => {
                        apply_token_changed(&session, &params);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "token change notifications dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { task }
    }
}

impl Drop for NotificationBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{test_key, ScriptedPeer, TokenReply};
    use crate::peer::TokenPeer;
    use crate::session::SsoSessionConfig;
    use crate::types::{amazon_q_scopes, AuthEventState, AuthState};

    async fn connected_session(peer: &Arc<ScriptedPeer>) -> Arc<SsoSession> {
        let session = Arc::new(SsoSession::new(
            SsoSessionConfig {
                profile_name: "q".into(),
                client_name: "qsso-test".into(),
                scopes: amazon_q_scopes(),
            },
            Arc::clone(peer) as Arc<dyn TokenPeer>,
            test_key(),
        ));
        session
            .login("https://d-1.awsapps.com/start", "us-east-1", amazon_q_scopes())
            .await
            .unwrap();
        session
    }

    fn changed(kind: SsoTokenChangedKind, id: &str) -> SsoTokenChangedParams {
        SsoTokenChangedParams {
            kind,
            sso_token_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_foreign_handle_is_ignored() {
        let peer = ScriptedPeer::new_shared();
        let session = connected_session(&peer).await;
        let mut rx = session.subscribe();

        for kind in [SsoTokenChangedKind::Expired, SsoTokenChangedKind::Refreshed] {
            let outcome = apply_token_changed(&session, &changed(kind, "someone-else"));
            assert_eq!(outcome, BridgeOutcome::Ignored);
        }
        assert_eq!(session.auth_state(), AuthState::Connected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expired_for_current_handle() {
        let peer = ScriptedPeer::new_shared();
        let session = connected_session(&peer).await;

        let outcome = apply_token_changed(&session, &changed(SsoTokenChangedKind::Expired, "tok-1"));
        assert_eq!(outcome, BridgeOutcome::Expired);
        assert_eq!(session.auth_state(), AuthState::Expired);
    }

    #[tokio::test]
    async fn test_refreshed_emits_without_state_change() {
        let peer = ScriptedPeer::new_shared();
        let session = connected_session(&peer).await;
        let mut rx = session.subscribe();

        let outcome = apply_token_changed(&session, &changed(SsoTokenChangedKind::Refreshed, "tok-1"));
        assert_eq!(outcome, BridgeOutcome::Refreshed);
        assert_eq!(session.auth_state(), AuthState::Connected);
        assert_eq!(rx.try_recv().unwrap().state, AuthEventState::Refreshed);
    }

    #[tokio::test]
    async fn test_no_handle_after_logout() {
        let peer = ScriptedPeer::new_shared();
        let session = connected_session(&peer).await;
        session.logout().await;

        let outcome = apply_token_changed(&session, &changed(SsoTokenChangedKind::Expired, "tok-1"));
        assert_eq!(outcome, BridgeOutcome::Ignored);
        assert_eq!(session.auth_state(), AuthState::NotConnected);
    }

    #[tokio::test]
    async fn test_bridge_task_applies_notifications() {
        let peer = ScriptedPeer::new_shared();
        peer.set_fallback(TokenReply::token("tok-7", "bearer-7"));
        let session = connected_session(&peer).await;
        let mut rx = session.subscribe();

        let _bridge = NotificationBridge::spawn(Arc::clone(&session), peer.token_changed());
        peer.emit_token_changed(SsoTokenChangedKind::Expired, "tok-7");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.state, AuthEventState::Changed(AuthState::Expired));
    }
}
