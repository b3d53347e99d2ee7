//! Version 1 of the identity protocol messages.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ============================================================================
// Method names
// ============================================================================

pub const METHOD_GET_SSO_TOKEN: &str = "aws/identity/getSsoToken";
pub const METHOD_UPDATE_PROFILE: &str = "aws/identity/updateProfile";
pub const METHOD_LIST_PROFILES: &str = "aws/identity/listProfiles";
pub const METHOD_INVALIDATE_SSO_TOKEN: &str = "aws/identity/invalidateSsoToken";
pub const METHOD_SSO_TOKEN_CHANGED: &str = "aws/identity/ssoTokenChanged";
pub const METHOD_UPDATE_BEARER_TOKEN: &str = "aws/credentials/token/update";
pub const METHOD_DELETE_BEARER_TOKEN: &str = "aws/credentials/token/delete";

// ============================================================================
// Token retrieval
// ============================================================================

/// Where the language server should obtain the SSO token from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SsoTokenSource {
    /// A named IAM Identity Center profile registered through `updateProfile`.
    #[serde(rename = "IamIdentityCenter", rename_all = "camelCase")]
    IamIdentityCenter { profile_name: String },
    /// The public Builder ID identity. Needs no profile registration.
    #[serde(rename = "AwsBuilderId", rename_all = "camelCase")]
    AwsBuilderId { sso_registration_scopes: Vec<String> },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSsoTokenOptions {
    /// Allow the server to start a browser-based login when the cached
    /// token is missing or invalid.
    #[serde(default)]
    pub login_on_invalid_token: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSsoTokenParams {
    pub client_name: String,
    pub source: SsoTokenSource,
    #[serde(default)]
    pub options: GetSsoTokenOptions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoToken {
    /// Opaque handle correlating this token with later change notifications.
    pub id: String,
    /// JWE compact serialization of the access token.
    pub access_token: String,
}

/// Credential material pushed back to the server for downstream feature calls.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCredentialsParams {
    pub data: String,
    #[serde(default)]
    pub encrypted: bool,
}

impl fmt::Debug for UpdateCredentialsParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateCredentialsParams")
            .field("data", &"<redacted>")
            .field("encrypted", &self.encrypted)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSsoTokenResult {
    pub sso_token: SsoToken,
    pub update_credentials_params: UpdateCredentialsParams,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidateSsoTokenParams {
    pub sso_token_id: String,
}

// ============================================================================
// Profiles
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileKind {
    SsoTokenProfile,
    #[serde(other)]
    Unknown,
}

/// Settings of a profile, keyed like the shared config file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_session: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub kinds: Vec<ProfileKind>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ProfileSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoSessionSettings {
    pub sso_start_url: String,
    pub sso_region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_registration_scopes: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoSession {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SsoSessionSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_nonexistent_profile: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_nonexistent_sso_session: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_shared_sso_session: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileParams {
    pub profile: Profile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_session: Option<SsoSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<UpdateProfileOptions>,
}

impl UpdateProfileParams {
    /// Profile + same-named SSO session, the layout used for a single
    /// feature profile.
    pub fn sso(name: &str, start_url: &str, region: &str, scopes: Vec<String>) -> Self {
        Self {
            profile: Profile {
                kinds: vec![ProfileKind::SsoTokenProfile],
                name: name.to_string(),
                settings: Some(ProfileSettings {
                    region: Some(region.to_string()),
                    sso_session: Some(name.to_string()),
                }),
            },
            sso_session: Some(SsoSession {
                name: name.to_string(),
                settings: Some(SsoSessionSettings {
                    sso_start_url: start_url.to_string(),
                    sso_region: region.to_string(),
                    sso_registration_scopes: Some(scopes),
                }),
            }),
            options: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProfilesResult {
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub sso_sessions: Vec<SsoSession>,
}

impl ListProfilesResult {
    /// Find `name` and the SSO session it links to.
    pub fn profile_with_session(&self, name: &str) -> Option<(&Profile, Option<&SsoSession>)> {
        let profile = self.profiles.iter().find(|p| p.name == name)?;
        let session = profile
            .settings
            .as_ref()
            .and_then(|s| s.sso_session.as_deref())
            .and_then(|session_name| self.sso_sessions.iter().find(|s| s.name == session_name));
        Some((profile, session))
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SsoTokenChangedKind {
    Expired,
    Refreshed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoTokenChangedParams {
    pub kind: SsoTokenChangedKind,
    pub sso_token_id: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Structured error codes carried in `error.data.awsErrorCode`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AwsErrorCode {
    Cancelled,
    SsoSessionNotFound,
    ProfileNotFound,
    InvalidSsoToken,
    CannotRefreshSsoToken,
    Other(String),
}

impl AwsErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            AwsErrorCode::Cancelled => "E_CANCELLED",
            AwsErrorCode::SsoSessionNotFound => "E_SSO_SESSION_NOT_FOUND",
            AwsErrorCode::ProfileNotFound => "E_PROFILE_NOT_FOUND",
            AwsErrorCode::InvalidSsoToken => "E_INVALID_SSO_TOKEN",
            AwsErrorCode::CannotRefreshSsoToken => "E_CANNOT_REFRESH_SSO_TOKEN",
            AwsErrorCode::Other(s) => s,
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "E_CANCELLED" => AwsErrorCode::Cancelled,
            "E_SSO_SESSION_NOT_FOUND" => AwsErrorCode::SsoSessionNotFound,
            "E_PROFILE_NOT_FOUND" => AwsErrorCode::ProfileNotFound,
            "E_INVALID_SSO_TOKEN" => AwsErrorCode::InvalidSsoToken,
            "E_CANNOT_REFRESH_SSO_TOKEN" => AwsErrorCode::CannotRefreshSsoToken,
            other => AwsErrorCode::Other(other.to_string()),
        }
    }
}

impl fmt::Display for AwsErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AwsErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AwsErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(AwsErrorCode::parse(&s))
    }
}

/// The `data` member of a JSON-RPC error raised by the identity server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsResponseErrorData {
    pub aws_error_code: AwsErrorCode,
}

// ============================================================================
// Channel setup
// ============================================================================

/// First line written to the server's stdin, before any JSON-RPC traffic.
/// Carries the symmetric key the server uses to encrypt token payloads.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionInit {
    pub version: String,
    pub mode: String,
    /// Base64 (standard alphabet) of the 32-byte key.
    pub key: String,
}

impl fmt::Debug for EncryptionInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionInit")
            .field("version", &self.version)
            .field("mode", &self.mode)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_sso_token_params_wire_shape() {
        let params = GetSsoTokenParams {
            client_name: "qsso".into(),
            source: SsoTokenSource::IamIdentityCenter {
                profile_name: "amazonq".into(),
            },
            options: GetSsoTokenOptions {
                login_on_invalid_token: true,
            },
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(
            value,
            json!({
                "clientName": "qsso",
                "source": { "kind": "IamIdentityCenter", "profileName": "amazonq" },
                "options": { "loginOnInvalidToken": true }
            })
        );
    }

    #[test]
    fn test_builder_id_source_shape() {
        let source = SsoTokenSource::AwsBuilderId {
            sso_registration_scopes: vec!["codewhisperer:completions".into()],
        };
        let value = serde_json::to_value(&source).unwrap();
        assert_eq!(
            value,
            json!({ "kind": "AwsBuilderId", "ssoRegistrationScopes": ["codewhisperer:completions"] })
        );
    }

    #[test]
    fn test_update_profile_settings_keep_config_keys() {
        let params = UpdateProfileParams::sso(
            "amazonq",
            "https://example.awsapps.com/start",
            "us-east-1",
            vec!["scope:a".into()],
        );
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value["profile"]["kinds"], json!(["SsoTokenProfile"]));
        assert_eq!(value["profile"]["settings"]["sso_session"], "amazonq");
        assert_eq!(
            value["ssoSession"]["settings"]["sso_start_url"],
            "https://example.awsapps.com/start"
        );
        assert!(value.get("options").is_none());
    }

    #[test]
    fn test_error_codes_parse_known_and_unknown() {
        let data: AwsResponseErrorData =
            serde_json::from_value(json!({ "awsErrorCode": "E_CANNOT_REFRESH_SSO_TOKEN" })).unwrap();
        assert_eq!(data.aws_error_code, AwsErrorCode::CannotRefreshSsoToken);

        let data: AwsResponseErrorData =
            serde_json::from_value(json!({ "awsErrorCode": "E_TIMEOUT" })).unwrap();
        assert_eq!(data.aws_error_code, AwsErrorCode::Other("E_TIMEOUT".into()));
        assert_eq!(data.aws_error_code.to_string(), "E_TIMEOUT");
    }

    #[test]
    fn test_token_changed_notification() {
        let params: SsoTokenChangedParams =
            serde_json::from_value(json!({ "kind": "Refreshed", "ssoTokenId": "tok-1" })).unwrap();
        assert_eq!(params.kind, SsoTokenChangedKind::Refreshed);
        assert_eq!(params.sso_token_id, "tok-1");
    }

    #[test]
    fn test_profile_with_session_lookup() {
        let result: ListProfilesResult = serde_json::from_value(json!({
            "profiles": [
                { "kinds": ["SsoTokenProfile"], "name": "amazonq",
                  "settings": { "region": "us-east-1", "sso_session": "amazonq" } },
                { "kinds": ["SomethingNew"], "name": "other" }
            ],
            "ssoSessions": [
                { "name": "amazonq", "settings": {
                    "sso_start_url": "https://example.awsapps.com/start",
                    "sso_region": "us-east-1",
                    "sso_registration_scopes": ["scope:a"] } }
            ]
        }))
        .unwrap();

        let (profile, session) = result.profile_with_session("amazonq").unwrap();
        assert_eq!(profile.kinds, vec![ProfileKind::SsoTokenProfile]);
        let settings = session.unwrap().settings.as_ref().unwrap();
        assert_eq!(settings.sso_region, "us-east-1");

        let (other, session) = result.profile_with_session("other").unwrap();
        assert_eq!(other.kinds, vec![ProfileKind::Unknown]);
        assert!(session.is_none());
        assert!(result.profile_with_session("missing").is_none());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let params = UpdateCredentialsParams {
            data: "secret-jwe".into(),
            encrypted: true,
        };
        assert!(!format!("{:?}", params).contains("secret-jwe"));
    }
}
