//! One-time import of the legacy multi-connection store.
//!
//! Earlier releases kept every connection under the `auth.profiles` state
//! key and cached their tokens under connection ids. Import picks the SSO
//! connection carrying exactly the feature's scopes, registers it with the
//! identity server under the feature profile, and moves its cache files to
//! the names the server looks for. The legacy entry is cleared whatever the
//! outcome, so a second run finds nothing to do.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use qsso_crypto::cache_key::{legacy_registration_cache_file, registration_cache_file, token_cache_file};
use qsso_proto::v1::UpdateProfileParams;

use crate::errors::AuthError;
use crate::peer::TokenPeer;
use crate::store::StateStore;
use crate::types::same_scope_set;

/// State key of the legacy connection map.
pub const LEGACY_PROFILES_KEY: &str = "auth.profiles";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyProfile {
    #[serde(rename = "type")]
    kind: String,
    start_url: Option<String>,
    sso_region: Option<String>,
    #[serde(default)]
    scopes: Vec<String>,
    metadata: Option<LegacyMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyMetadata {
    connection_state: Option<String>,
}

impl LegacyProfile {
    fn is_valid(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.connection_state.as_deref())
            == Some("valid")
    }
}

/// Everything the import needs from its surroundings.
pub struct MigrationContext<'a> {
    pub peer: &'a dyn TokenPeer,
    pub store: &'a dyn StateStore,
    /// Profile the imported connection is registered under
    pub profile_name: &'a str,
    /// Tool name the new registration cache file is keyed by
    pub client_name: &'a str,
    pub required_scopes: &'a [String],
    pub cache_dir: &'a Path,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The legacy entry is absent
    NothingToMigrate,
    /// No legacy SSO connection carries the required scopes
    NoMatchingProfile,
    Migrated {
        legacy_id: String,
        start_url: String,
        moved_files: usize,
    },
}

pub async fn migrate_legacy_profiles(ctx: &MigrationContext<'_>) -> Result<MigrationOutcome, AuthError> {
    let Some(legacy) = ctx.store.get(LEGACY_PROFILES_KEY).await? else {
        debug!("no legacy connections to migrate");
        return Ok(MigrationOutcome::NothingToMigrate);
    };

    let result = import(ctx, legacy).await;
    let cleared = ctx.store.remove(LEGACY_PROFILES_KEY).await;

    let outcome = result?;
    cleared?;
    Ok(outcome)
}

async fn import(ctx: &MigrationContext<'_>, legacy: Value) -> Result<MigrationOutcome, AuthError> {
    let Value::Object(entries) = legacy else {
        return Err(AuthError::Migration(format!(
            "{} is not an object",
            LEGACY_PROFILES_KEY
        )));
    };

    let Some((legacy_id, profile)) = select_profile(&entries, ctx.required_scopes) else {
        info!(candidates = entries.len(), "no legacy connection matches the required scopes");
        return Ok(MigrationOutcome::NoMatchingProfile);
    };
    let (Some(start_url), Some(region)) = (profile.start_url.clone(), profile.sso_region.clone()) else {
        return Err(AuthError::Migration(format!(
            "legacy connection {} lacks start URL or region",
            legacy_id
        )));
    };

    ctx.peer
        .update_profile(UpdateProfileParams::sso(
            ctx.profile_name,
            &start_url,
            &region,
            ctx.required_scopes.to_vec(),
        ))
        .await?;

    let moves = [
        (
            legacy_registration_cache_file(ctx.cache_dir, &start_url, &region, &profile.scopes),
            registration_cache_file(ctx.cache_dir, &start_url, &region, ctx.client_name),
        ),
        (
            token_cache_file(ctx.cache_dir, &legacy_id),
            token_cache_file(ctx.cache_dir, ctx.profile_name),
        ),
    ];
    let mut moved_files = 0;
    for (from, to) in &moves {
        if move_cache_file(from, to).await {
            moved_files += 1;
        }
    }

    info!(legacy_id = %legacy_id, start_url = %start_url, moved_files, "legacy connection migrated");
    Ok(MigrationOutcome::Migrated {
        legacy_id,
        start_url,
        moved_files,
    })
}

/// First `valid` SSO connection with exactly `required` scopes, otherwise the
/// last matching one.
fn select_profile(
    entries: &serde_json::Map<String, Value>,
    required: &[String],
) -> Option<(String, LegacyProfile)> {
    let mut chosen = None;

    for (id, value) in entries {
        let profile: LegacyProfile = match serde_json::from_value(value.clone()) {
            Ok(p) => p,
            Err(e) => {
                debug!(id = %id, error = %e, "skipping unreadable legacy connection");
                continue;
            }
        };
        if profile.kind != "sso" {
            continue;
        }
        if !same_scope_set(&profile.scopes, required) {
            continue;
        }
        let valid = profile.is_valid();
        chosen = Some((id.clone(), profile));
        if valid {
            break;
        }
    }
    chosen
}

/// Rename `from` to `to`. A missing source is skipped; other failures are
/// logged and skipped too.
async fn move_cache_file(from: &Path, to: &Path) -> bool {
    match tokio::fs::try_exists(from).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(path = %from.display(), "legacy cache file not found");
            return false;
        }
        Err(e) => {
            warn!(path = %from.display(), error = %e, "cannot inspect legacy cache file");
            return false;
        }
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => {
            debug!(from = %from.display(), to = %to.display(), "cache file moved");
            true
        }
        Err(e) => {
            warn!(from = %from.display(), error = %e, "failed to move cache file");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn required() -> Vec<String> {
        vec!["a:read".to_string(), "a:write".to_string()]
    }

    #[test]
    fn test_select_prefers_valid() {
        let entries = json!({
            "1": { "type": "sso", "startUrl": "https://one", "ssoRegion": "us-east-1", "scopes": ["a:write", "a:read"] },
            "2": { "type": "sso", "startUrl": "https://two", "ssoRegion": "us-east-1", "scopes": ["a:read", "a:write"],
                   "metadata": { "connectionState": "valid" } },
            "3": { "type": "sso", "startUrl": "https://three", "ssoRegion": "us-east-1", "scopes": ["a:read", "a:write"] }
        });
        let Value::Object(entries) = entries else { unreachable!() };
        let (id, profile) = select_profile(&entries, &required()).unwrap();
        assert_eq!(id, "2");
        assert_eq!(profile.start_url.as_deref(), Some("https://two"));
    }

    #[test]
    fn test_select_requires_exact_scopes_and_sso() {
        let entries = json!({
            "iam": { "type": "iam", "scopes": ["a:read", "a:write"] },
            "subset": { "type": "sso", "startUrl": "https://x", "ssoRegion": "us-east-1", "scopes": ["a:read"] },
            "superset": { "type": "sso", "startUrl": "https://y", "ssoRegion": "us-east-1",
                          "scopes": ["a:read", "a:write", "b:read"] },
            "garbage": 42
        });
        let Value::Object(entries) = entries else { unreachable!() };
        assert!(select_profile(&entries, &required()).is_none());
    }

    #[test]
    fn test_select_falls_back_to_last_match() {
        let entries = json!({
            "1": { "type": "sso", "startUrl": "https://one", "ssoRegion": "us-east-1", "scopes": ["a:read", "a:write"] },
            "2": { "type": "sso", "startUrl": "https://two", "ssoRegion": "us-east-1", "scopes": ["a:read", "a:write"],
                   "metadata": { "connectionState": "invalid" } }
        });
        let Value::Object(entries) = entries else { unreachable!() };
        let (id, _) = select_profile(&entries, &required()).unwrap();
        assert_eq!(id, "2");
    }

    #[tokio::test]
    async fn test_registration_file_keyed_by_legacy_scope_order() {
        use crate::harness::ScriptedPeer;
        use crate::store::InMemoryStateStore;

        let cache = tempfile::tempdir().unwrap();
        let legacy_scopes = vec!["a:write".to_string(), "a:read".to_string()];
        let legacy_file =
            legacy_registration_cache_file(cache.path(), "https://one", "us-east-1", &legacy_scopes);
        std::fs::write(&legacy_file, b"{}").unwrap();

        let peer = ScriptedPeer::new_shared();
        let store = InMemoryStateStore::new();
        store
            .set(
                LEGACY_PROFILES_KEY,
                json!({ "1": { "type": "sso", "startUrl": "https://one", "ssoRegion": "us-east-1",
                               "scopes": legacy_scopes } }),
            )
            .await
            .unwrap();

        let required = required();
        let ctx = MigrationContext {
            peer: peer.as_ref(),
            store: &store,
            profile_name: "q",
            client_name: "qsso-test",
            required_scopes: &required,
            cache_dir: cache.path(),
        };
        let outcome = migrate_legacy_profiles(&ctx).await.unwrap();
        assert!(matches!(outcome, MigrationOutcome::Migrated { moved_files: 1, .. }));
        assert!(!legacy_file.exists());
        assert!(registration_cache_file(cache.path(), "https://one", "us-east-1", "qsso-test").exists());
    }
}
