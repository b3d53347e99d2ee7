//! Connection and state types shared by the session and the registry.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Start URL of the public identity service (AWS Builder ID).
pub const BUILDER_ID_START_URL: &str = "https://view.awsapps.com/start";

/// Region the public identity service is hosted in.
pub const BUILDER_ID_REGION: &str = "us-east-1";

/// Scopes the assistant feature requires from an SSO connection.
pub const AMAZON_Q_SCOPES: &[&str] = &[
    "codewhisperer:completions",
    "codewhisperer:analysis",
    "codewhisperer:conversations",
    "codewhisperer:transformations",
    "codewhisperer:taskassist",
];

/// Owned copy of [`AMAZON_Q_SCOPES`].
pub fn amazon_q_scopes() -> Vec<String> {
    AMAZON_Q_SCOPES.iter().map(|s| s.to_string()).collect()
}

pub fn is_builder_id(start_url: &str) -> bool {
    start_url == BUILDER_ID_START_URL
}

// ============================================================================
// Connections
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Sso,
    Iam,
}

/// Attributes of an SSO connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoConnection {
    /// Profile name the connection is registered under
    pub id: String,
    pub start_url: String,
    pub region: String,
    /// Requested scopes in the caller's order, without duplicates
    pub scopes: Vec<String>,
    /// Handle of the token most recently issued for this connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl SsoConnection {
    pub fn new<I, S>(id: &str, start_url: &str, region: &str, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            start_url: start_url.to_string(),
            region: region.to_string(),
            scopes: dedup_scopes(scopes.into_iter().map(Into::into)),
            token_id: None,
        }
    }

    pub fn is_builder_id(&self) -> bool {
        is_builder_id(&self.start_url)
    }

    pub fn scope_list(&self) -> Vec<String> {
        self.scopes.clone()
    }

    /// Whether `scopes` names the same set of scopes, in any order.
    pub fn has_scopes(&self, scopes: &[String]) -> bool {
        same_scope_set(&self.scopes, scopes)
    }
}

/// Set equality of two scope lists.
pub fn same_scope_set(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let b: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

fn dedup_scopes(scopes: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    scopes.filter(|s| seen.insert(s.clone())).collect()
}

/// IAM credentials connection. Only the identity is modelled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamConnection {
    pub id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Connection {
    Sso(SsoConnection),
    Iam(IamConnection),
}

impl Connection {
    pub fn id(&self) -> &str {
        match self {
            Connection::Sso(c) => &c.id,
            Connection::Iam(c) => &c.id,
        }
    }

    pub fn kind(&self) -> ConnectionKind {
        match self {
            Connection::Sso(_) => ConnectionKind::Sso,
            Connection::Iam(_) => ConnectionKind::Iam,
        }
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthState {
    #[default]
    NotConnected,
    Connected,
    Expired,
}

impl AuthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::NotConnected => "notConnected",
            AuthState::Connected => "connected",
            AuthState::Expired => "expired",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a session event carries: a new state, or the transient refresh
/// signal that never becomes a stored state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthEventState {
    Changed(AuthState),
    Refreshed,
}

/// Emitted by a session on every observed transition and on refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthStateEvent {
    pub id: String,
    pub state: AuthEventState,
}

/// Republished by the registry once its side effects have run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionStateEvent {
    pub id: String,
    pub state: AuthState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tagging() {
        let conn = Connection::Sso(SsoConnection::new(
            "q",
            "https://example.awsapps.com/start",
            "us-west-2",
            ["b", "a"],
        ));
        let json = serde_json::to_value(&conn).unwrap();
        assert_eq!(json["type"], "sso");
        assert_eq!(json["startUrl"], "https://example.awsapps.com/start");
        assert_eq!(json["scopes"], serde_json::json!(["b", "a"]));
        assert_eq!(conn.kind(), ConnectionKind::Sso);
        assert_eq!(conn.id(), "q");
    }

    #[test]
    fn test_scopes_keep_order_and_drop_duplicates() {
        let conn = SsoConnection::new("q", BUILDER_ID_START_URL, BUILDER_ID_REGION, ["c", "a", "c", "b"]);
        assert_eq!(conn.scope_list(), vec!["c", "a", "b"]);
        assert!(conn.has_scopes(&["a".into(), "b".into(), "c".into()]));
        assert!(!conn.has_scopes(&["a".into(), "b".into()]));
        assert!(same_scope_set(&amazon_q_scopes(), &amazon_q_scopes().into_iter().rev().collect::<Vec<_>>()));
    }

    #[test]
    fn test_builder_id_detection() {
        let conn = SsoConnection::new("q", BUILDER_ID_START_URL, BUILDER_ID_REGION, amazon_q_scopes());
        assert!(conn.is_builder_id());
        assert!(!is_builder_id("https://d-123.awsapps.com/start"));
    }

    #[test]
    fn test_auth_state_strings() {
        assert_eq!(AuthState::default(), AuthState::NotConnected);
        assert_eq!(AuthState::Expired.to_string(), "expired");
        assert_eq!(
            serde_json::to_value(AuthState::NotConnected).unwrap(),
            serde_json::json!("notConnected")
        );
    }
}
