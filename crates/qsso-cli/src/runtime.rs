//! Composition root: language server process, token peer and auth registry
//!
//! One [`Runtime`] lives for the duration of a command. Start-up order:
//! 1. Generate the channel key and spawn the server with the key as preamble
//! 2. `initialize` handshake
//! 3. Wrap the connection in an [`RpcTokenPeer`] and start the registry

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use qsso_core::registry::{Dependents, VisibilityFlags};
use qsso_core::rpc_peer::RpcTokenPeer;
use qsso_core::store::JsonFileStateStore;
use qsso_core::types::amazon_q_scopes;
use qsso_core::{AuthRegistry, AuthState, ConnectionKind, ConnectionStateEvent, RegistryConfig};
use qsso_crypto::channel_key::ChannelKey;
use qsso_transport::{ConnectionOptions, ServerProcess};

use crate::config::Config;

/// Upper bound for the registry's listener to finish reacting to a
/// state change before the server is shut down.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Dependents for a terminal session: onboarding goes to stderr, the
/// rest is logged.
pub struct TerminalDependents {
    quiet: bool,
}

impl TerminalDependents {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

#[async_trait]
impl Dependents for TerminalDependents {
    async fn show_onboarding(&self) {
        if !self.quiet {
            eprintln!("Signed in. Amazon Q is ready to use with this connection.");
        }
    }

    async fn set_visibility(&self, flags: VisibilityFlags) {
        debug!(?flags, "visibility updated");
    }

    async fn refresh_presentation(&self, state: AuthState) {
        debug!(%state, "presentation refreshed");
    }

    async fn notify_new_customizations(&self) {
        info!("identity center connection established, customizations may be available");
    }
}

pub struct Runtime {
    process: ServerProcess,
    registry: Arc<AuthRegistry>,
}

impl Runtime {
    /// Spawn the server and build a registry over it.
    pub async fn start(config: &Config, quiet: bool) -> anyhow::Result<Self> {
        let key = ChannelKey::generate().context("failed to generate channel key")?;
        let preamble = serde_json::to_vec(&key.encryption_init())?;

        let mut options = ConnectionOptions::default();
        if let Some(timeout) = config.server.request_timeout() {
            options = options.with_request_timeout(timeout);
        }

        let process = ServerProcess::spawn(
            OsStr::new(&config.server.command),
            &config.server.args,
            Some(&preamble),
            options,
        )
        .await
        .with_context(|| format!("failed to start language server '{}'", config.server.command))?;

        let result = process
            .connection()
            .initialize(initialize_params(&config.client.client_name))
            .await
            .context("initialize handshake failed")?;
        debug!(server = %server_name(&result), "language server initialized");

        let state_path = config
            .storage
            .resolve_state_path()
            .ok_or_else(|| anyhow!("could not determine a location for the state file"))?;
        let cache_dir = config
            .storage
            .resolve_sso_cache_dir()
            .ok_or_else(|| anyhow!("could not determine the SSO cache directory"))?;

        let registry = AuthRegistry::start(
            registry_config(config, &cache_dir),
            Arc::new(RpcTokenPeer::new(process.connection().clone())),
            key,
            Arc::new(JsonFileStateStore::new(state_path)),
            Arc::new(TerminalDependents::new(quiet)),
        );

        Ok(Self { process, registry })
    }

    pub fn registry(&self) -> &Arc<AuthRegistry> {
        &self.registry
    }

    /// Stop the server. Errors are logged, not returned.
    pub async fn shutdown(self) {
        let Self { process, registry } = self;
        drop(registry);
        if let Err(e) = process.shutdown().await {
            warn!(error = %e, "language server did not shut down cleanly");
        }
    }
}

pub fn registry_config(config: &Config, cache_dir: &Path) -> RegistryConfig {
    RegistryConfig {
        profile_name: config.client.profile_name.clone(),
        client_name: config.client.client_name.clone(),
        scopes: amazon_q_scopes(),
        sso_cache_dir: cache_dir.to_path_buf(),
        kind: ConnectionKind::Sso,
    }
}

fn initialize_params(client_name: &str) -> Value {
    json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": client_name,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "capabilities": {},
        "initializationOptions": {
            "aws": {
                "clientInfo": {
                    "name": client_name,
                    "version": env!("CARGO_PKG_VERSION"),
                    "extension": { "name": client_name, "version": env!("CARGO_PKG_VERSION") },
                },
                "awsClientCapabilities": {
                    "window": { "notifications": false }
                }
            }
        }
    })
}

fn server_name(result: &Value) -> &str {
    result
        .pointer("/serverInfo/name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
}

/// Wait until the registry has republished a state change, or give up
/// after [`SETTLE_TIMEOUT`].
pub async fn settle(events: &mut tokio::sync::broadcast::Receiver<ConnectionStateEvent>) -> Option<AuthState> {
    match tokio::time::timeout(SETTLE_TIMEOUT, events.recv()).await {
        Ok(Ok(event)) => Some(event.state),
        Ok(Err(e)) => {
            debug!(error = %e, "state event stream ended");
            None
        }
        Err(_) => {
            debug!("no state change within settle timeout");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_registry_config_from_config() {
        let mut config = Config::default();
        config.client.profile_name = "work".into();

        let rc = registry_config(&config, &PathBuf::from("/tmp/cache"));
        assert_eq!(rc.profile_name, "work");
        assert_eq!(rc.client_name, "qsso");
        assert_eq!(rc.scopes, amazon_q_scopes());
        assert_eq!(rc.sso_cache_dir, PathBuf::from("/tmp/cache"));
        assert_eq!(rc.kind, ConnectionKind::Sso);
    }

    #[test]
    fn test_initialize_params_carry_client_name() {
        let params = initialize_params("qsso");
        assert_eq!(params["clientInfo"]["name"], "qsso");
        assert_eq!(params["initializationOptions"]["aws"]["clientInfo"]["name"], "qsso");
    }

    #[test]
    fn test_server_name() {
        assert_eq!(server_name(&json!({ "serverInfo": { "name": "lsp" } })), "lsp");
        assert_eq!(server_name(&json!({})), "unknown");
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_server() {
        let mut config = Config::default();
        config.server.command = "/nonexistent/qsso-test-server".into();
        let err = Runtime::start(&config, true).await.err().unwrap();
        assert!(err.to_string().contains("failed to start language server"));
    }
}
