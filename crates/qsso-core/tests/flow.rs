//! Integration tests for start-up and wire-level flows.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use qsso_core::{
    harness::{test_key, ScriptedPeer},
    migration::{MigrationOutcome, LEGACY_PROFILES_KEY},
    rpc_peer::RpcTokenPeer,
    store::{InMemoryStateStore, StateStore},
    types::amazon_q_scopes,
    AuthRegistry, AuthState, Connection, ConnectionKind, NoopDependents, RegistryConfig,
    RestoreOutcome,
};
use qsso_crypto::cache_key::{legacy_registration_cache_file, registration_cache_file, token_cache_file};
use qsso_crypto::token_envelope::seal_access_token;
use qsso_proto::v1::{
    METHOD_DELETE_BEARER_TOKEN, METHOD_GET_SSO_TOKEN, METHOD_INVALIDATE_SSO_TOKEN,
    METHOD_LIST_PROFILES, METHOD_SSO_TOKEN_CHANGED, METHOD_UPDATE_BEARER_TOKEN,
    METHOD_UPDATE_PROFILE,
};
use qsso_transport::testing::{connected_pair, FnHandler};
use qsso_transport::{ConnectionOptions, RpcError};

const LEGACY_URL: &str = "https://d-legacy.awsapps.com/start";

fn config(cache_dir: &std::path::Path) -> RegistryConfig {
    RegistryConfig {
        profile_name: "q".into(),
        client_name: "qsso-test".into(),
        scopes: amazon_q_scopes(),
        sso_cache_dir: cache_dir.to_path_buf(),
        kind: ConnectionKind::Sso,
    }
}

fn legacy_profiles() -> Value {
    json!({
        "legacy-1": {
            "type": "sso",
            "startUrl": LEGACY_URL,
            "ssoRegion": "eu-central-1",
            "scopes": amazon_q_scopes(),
            "metadata": { "connectionState": "valid" }
        },
        "legacy-2": {
            "type": "sso",
            "startUrl": "https://d-other.awsapps.com/start",
            "ssoRegion": "us-east-1",
            "scopes": ["sso:account:access"]
        }
    })
}

#[tokio::test]
async fn flow_restore_migrates_legacy_connection() {
    let cache = tempfile::tempdir().unwrap();
    let scopes = amazon_q_scopes();

    let legacy_registration =
        legacy_registration_cache_file(cache.path(), LEGACY_URL, "eu-central-1", &scopes);
    let legacy_token = token_cache_file(cache.path(), "legacy-1");
    std::fs::write(&legacy_registration, b"{\"clientId\":\"c\"}").unwrap();
    std::fs::write(&legacy_token, b"{\"accessToken\":\"t\"}").unwrap();

    let peer = ScriptedPeer::new_shared();
    let store = InMemoryStateStore::new_shared();
    store.set(LEGACY_PROFILES_KEY, legacy_profiles()).await.unwrap();

    let registry = AuthRegistry::start(
        config(cache.path()),
        peer.clone(),
        test_key(),
        store.clone(),
        Arc::new(NoopDependents),
    );

    assert_eq!(registry.restore().await, RestoreOutcome::Restored);
    assert_eq!(registry.auth_state(), AuthState::Connected);
    match registry.connection() {
        Some(Connection::Sso(c)) => {
            assert_eq!(c.start_url, LEGACY_URL);
            assert_eq!(c.region, "eu-central-1");
        }
        other => panic!("unexpected connection {:?}", other),
    }

    let registered = peer.update_profile_calls();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].profile.name, "q");

    assert!(!legacy_registration.exists());
    assert!(!legacy_token.exists());
    assert!(registration_cache_file(cache.path(), LEGACY_URL, "eu-central-1", "qsso-test").exists());
    assert!(token_cache_file(cache.path(), "q").exists());
    assert!(store.get(LEGACY_PROFILES_KEY).await.unwrap().is_none());

    // Second run finds nothing.
    assert_eq!(
        registry.migrate_legacy().await.unwrap(),
        MigrationOutcome::NothingToMigrate
    );
    assert_eq!(peer.update_profile_calls().len(), 1);
}

#[tokio::test]
async fn flow_migration_without_cache_files() {
    let cache = tempfile::tempdir().unwrap();
    let peer = ScriptedPeer::new_shared();
    let store = InMemoryStateStore::new_shared();
    store.set(LEGACY_PROFILES_KEY, legacy_profiles()).await.unwrap();

    let registry = AuthRegistry::start(
        config(cache.path()),
        peer.clone(),
        test_key(),
        store.clone(),
        Arc::new(NoopDependents),
    );

    let outcome = registry.migrate_legacy().await.unwrap();
    assert_eq!(
        outcome,
        MigrationOutcome::Migrated {
            legacy_id: "legacy-1".into(),
            start_url: LEGACY_URL.into(),
            moved_files: 0,
        }
    );
    assert_eq!(
        registry.migrate_legacy().await.unwrap(),
        MigrationOutcome::NothingToMigrate
    );
}

#[tokio::test]
async fn flow_migration_clears_unmatched_entry() {
    let cache = tempfile::tempdir().unwrap();
    let peer = ScriptedPeer::new_shared();
    let store = InMemoryStateStore::new_shared();
    store
        .set(
            LEGACY_PROFILES_KEY,
            json!({ "iam-1": { "type": "iam" } }),
        )
        .await
        .unwrap();

    let registry = AuthRegistry::start(
        config(cache.path()),
        peer.clone(),
        test_key(),
        store.clone(),
        Arc::new(NoopDependents),
    );

    assert_eq!(
        registry.migrate_legacy().await.unwrap(),
        MigrationOutcome::NoMatchingProfile
    );
    assert!(store.get(LEGACY_PROFILES_KEY).await.unwrap().is_none());
    assert!(peer.update_profile_calls().is_empty());
}

#[tokio::test]
async fn flow_migration_clears_malformed_entry() {
    let cache = tempfile::tempdir().unwrap();
    let peer = ScriptedPeer::new_shared();
    let store = InMemoryStateStore::new_shared();
    store.set(LEGACY_PROFILES_KEY, json!("garbage")).await.unwrap();

    let registry = AuthRegistry::start(
        config(cache.path()),
        peer,
        test_key(),
        store.clone(),
        Arc::new(NoopDependents),
    );

    assert!(registry.migrate_legacy().await.is_err());
    assert!(store.get(LEGACY_PROFILES_KEY).await.unwrap().is_none());
    assert_eq!(
        registry.migrate_legacy().await.unwrap(),
        MigrationOutcome::NothingToMigrate
    );
}

#[tokio::test]
async fn flow_login_over_json_rpc() {
    let key = test_key();
    let (client, server) = connected_pair(ConnectionOptions::default());

    let server_key = key.clone();
    server.set_request_handler(Arc::new(FnHandler::new(move |method, _params| match method {
        METHOD_GET_SSO_TOKEN => {
            let sealed = seal_access_token(&server_key, "rpc-bearer")
                .map_err(|e| RpcError::new(-32603, e.to_string()))?;
            Ok(json!({
                "ssoToken": { "id": "rpc-tok", "accessToken": sealed },
                "updateCredentialsParams": { "data": sealed, "encrypted": true }
            }))
        }
        METHOD_UPDATE_PROFILE | METHOD_INVALIDATE_SSO_TOKEN | METHOD_UPDATE_BEARER_TOKEN => Ok(Value::Null),
        METHOD_LIST_PROFILES => Ok(json!({ "profiles": [], "ssoSessions": [] })),
        other => Err(RpcError::method_not_found(other)),
    })));
    let mut deletes = server.subscribe(METHOD_DELETE_BEARER_TOKEN);

    let cache = tempfile::tempdir().unwrap();
    let registry = AuthRegistry::start(
        config(cache.path()),
        Arc::new(RpcTokenPeer::new(client)),
        key,
        InMemoryStateStore::new_shared(),
        Arc::new(NoopDependents),
    );
    let mut events = registry.subscribe();

    registry
        .login("https://d-rpc.awsapps.com/start", "us-west-2", amazon_q_scopes())
        .await
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.state, AuthState::Connected);

    let bundle = registry.get_token().await.unwrap();
    assert_eq!(bundle.token.expose(), "rpc-bearer");

    server
        .notify(
            METHOD_SSO_TOKEN_CHANGED,
            &json!({ "kind": "Expired", "ssoTokenId": "rpc-tok" }),
        )
        .unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.state, AuthState::Expired);

    // The expired transition withdrew the pushed token.
    tokio::time::timeout(Duration::from_secs(5), deletes.recv())
        .await
        .unwrap()
        .unwrap();
}
