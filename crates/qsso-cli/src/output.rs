//! Output formatting for CLI results
//!
//! Three output formats are supported:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting
//! - Quiet: Minimal output, exit codes only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use qsso_core::migration::MigrationOutcome;
use qsso_core::{AuthState, Connection, RestoreOutcome, TokenBundle};

use crate::ExitCode;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format for scripting
    Json,
    /// Minimal output - exit codes only
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable exit code name on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }

    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            command: Some(command.to_string()),
            ..Self::success(data)
        }
    }
}

impl JsonResponse<()> {
    pub fn error(message: &str, code: ExitCode) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            code: Some(code.name()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

// ============================================================================
// Report structures
// ============================================================================

/// Connection status as shown by `qsso status`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: AuthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
}

impl StatusReport {
    pub fn new(state: AuthState, connection: Option<&Connection>) -> Self {
        let mut report = Self {
            state,
            connection_type: None,
            profile: None,
            start_url: None,
            region: None,
            scopes: Vec::new(),
            token_id: None,
        };
        match connection {
            Some(Connection::Sso(c)) => {
                report.connection_type = Some(if c.is_builder_id() {
                    "builderId"
                } else {
                    "identityCenter"
                });
                report.profile = Some(c.id.clone());
                report.start_url = Some(c.start_url.clone());
                report.region = Some(c.region.clone());
                report.scopes = c.scope_list();
                report.token_id = c.token_id.clone();
            }
            Some(Connection::Iam(c)) => {
                report.connection_type = Some("iam");
                report.profile = Some(c.id.clone());
            }
            None => {}
        }
        report
    }
}

/// Token summary; the bearer is only included when asked for.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl TokenReport {
    pub fn new(bundle: &TokenBundle, token_id: Option<String>, show: bool) -> Self {
        Self {
            token_id,
            encrypted: bundle.update_credentials.encrypted,
            bearer_token: show.then(|| bundle.token.expose().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&RestoreOutcome> for RestoreReport {
    fn from(outcome: &RestoreOutcome) -> Self {
        match outcome {
            RestoreOutcome::Restored => Self { outcome: "restored", detail: None },
            RestoreOutcome::Expired => Self { outcome: "expired", detail: None },
            RestoreOutcome::NoSession => Self { outcome: "noSession", detail: None },
            RestoreOutcome::TransportFailure(msg) => Self {
                outcome: "transportFailure",
                detail: Some(msg.clone()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    pub moved_files: usize,
}

impl From<&MigrationOutcome> for MigrationReport {
    fn from(outcome: &MigrationOutcome) -> Self {
        match outcome {
            MigrationOutcome::NothingToMigrate => Self {
                outcome: "nothingToMigrate",
                legacy_id: None,
                start_url: None,
                moved_files: 0,
            },
            MigrationOutcome::NoMatchingProfile => Self {
                outcome: "noMatchingProfile",
                legacy_id: None,
                start_url: None,
                moved_files: 0,
            },
            MigrationOutcome::Migrated {
                legacy_id,
                start_url,
                moved_files,
            } => Self {
                outcome: "migrated",
                legacy_id: Some(legacy_id.clone()),
                start_url: Some(start_url.clone()),
                moved_files: *moved_files,
            },
        }
    }
}

// ============================================================================
// Formatter
// ============================================================================

/// Formats output for different modes
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_quiet(&self) -> bool {
        self.format == OutputFormat::Quiet
    }

    pub fn format_status(&self, report: &StatusReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut rows = vec![("State", report.state.to_string())];
                if let Some(kind) = report.connection_type {
                    rows.push(("Type", kind.to_string()));
                }
                if let Some(profile) = &report.profile {
                    rows.push(("Profile", profile.clone()));
                }
                if let Some(url) = &report.start_url {
                    rows.push(("Start URL", url.clone()));
                }
                if let Some(region) = &report.region {
                    rows.push(("Region", region.clone()));
                }
                if !report.scopes.is_empty() {
                    rows.push(("Scopes", report.scopes.join("\n")));
                }
                if self.verbose {
                    if let Some(id) = &report.token_id {
                        rows.push(("Token ID", id.clone()));
                    }
                }
                property_table(&rows)
            }
            OutputFormat::Json => to_json(&JsonResponse::success_with_command(report, "status")),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_token(&self, report: &TokenReport) -> String {
        match self.format {
            OutputFormat::Table => match &report.bearer_token {
                // Bare token on stdout so it can be captured by scripts.
                Some(token) => token.clone(),
                None => {
                    let rows = vec![
                        ("Token ID", report.token_id.clone().unwrap_or_else(|| "-".into())),
                        ("Encrypted", report.encrypted.to_string()),
                        ("Bearer", "<hidden, use --show>".to_string()),
                    ];
                    property_table(&rows)
                }
            },
            OutputFormat::Json => to_json(&JsonResponse::success_with_command(report, "token")),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_restore(&self, report: &RestoreReport) -> String {
        match self.format {
            OutputFormat::Table => match &report.detail {
                Some(detail) => format!("Restore: {} ({})", report.outcome, detail),
                None => format!("Restore: {}", report.outcome),
            },
            OutputFormat::Json => to_json(&JsonResponse::success_with_command(report, "restore")),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_migration(&self, report: &MigrationReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut rows = vec![("Outcome", report.outcome.to_string())];
                if let Some(id) = &report.legacy_id {
                    rows.push(("Legacy ID", id.clone()));
                }
                if let Some(url) = &report.start_url {
                    rows.push(("Start URL", url.clone()));
                }
                rows.push(("Files Moved", report.moved_files.to_string()));
                property_table(&rows)
            }
            OutputFormat::Json => to_json(&JsonResponse::success_with_command(report, "migrate")),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn success(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Table => format!("✓ {message}"),
            OutputFormat::Json => to_json(&JsonResponse::success(message)),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn error(&self, message: &str, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Table => format!("✗ Error: {message}"),
            OutputFormat::Json => to_json(&JsonResponse::error(message, code)),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn warning(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Table => format!("⚠ Warning: {message}"),
            OutputFormat::Json | OutputFormat::Quiet => String::new(),
        }
    }

    pub fn info(&self, message: &str) -> String {
        match self.format {
            OutputFormat::Table if self.verbose => format!("ℹ {message}"),
            _ => String::new(),
        }
    }
}

fn property_table(rows: &[(&str, String)]) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Property", "Value"]);
    for (name, value) in rows {
        table.add_row(vec![*name, value.as_str()]);
    }
    table.to_string()
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"success\":false,\"error\":\"{e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qsso_core::types::{amazon_q_scopes, BUILDER_ID_REGION, BUILDER_ID_START_URL};
    use qsso_core::SsoConnection;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str("quiet").unwrap(), OutputFormat::Quiet);
        assert!(OutputFormat::from_str("invalid").is_err());
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }

    #[test]
    fn test_json_response_error_carries_code() {
        let response = JsonResponse::error("no session", ExitCode::NotConnected);
        assert!(!response.success);
        assert_eq!(response.code, Some("NOT_CONNECTED"));
        let json: serde_json::Value =
            serde_json::from_str(&to_json(&response)).unwrap();
        assert_eq!(json["error"], "no session");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_status_report_builder_id() {
        let conn = Connection::Sso(SsoConnection::new(
            "amazonq",
            BUILDER_ID_START_URL,
            BUILDER_ID_REGION,
            amazon_q_scopes(),
        ));
        let report = StatusReport::new(AuthState::Connected, Some(&conn));
        assert_eq!(report.connection_type, Some("builderId"));
        assert_eq!(report.region.as_deref(), Some(BUILDER_ID_REGION));
        assert_eq!(report.scopes.len(), amazon_q_scopes().len());
    }

    #[test]
    fn test_status_report_not_connected() {
        let report = StatusReport::new(AuthState::NotConnected, None);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "notConnected" }));
    }

    #[test]
    fn test_status_table_hides_token_id_unless_verbose() {
        let mut conn = SsoConnection::new(
            "amazonq",
            "https://d-123.awsapps.com/start",
            "eu-west-1",
            amazon_q_scopes(),
        );
        conn.token_id = Some("tok-9".into());
        let report = StatusReport::new(AuthState::Connected, Some(&Connection::Sso(conn)));

        let quiet = OutputFormatter::new(OutputFormat::Table, false).format_status(&report);
        assert!(quiet.contains("identityCenter"));
        assert!(!quiet.contains("tok-9"));

        let verbose = OutputFormatter::new(OutputFormat::Table, true).format_status(&report);
        assert!(verbose.contains("tok-9"));
    }

    #[test]
    fn test_migration_report() {
        let report = MigrationReport::from(&MigrationOutcome::Migrated {
            legacy_id: "legacy-1".into(),
            start_url: "https://d-1.awsapps.com/start".into(),
            moved_files: 2,
        });
        assert_eq!(report.outcome, "migrated");
        assert_eq!(report.moved_files, 2);

        let report = MigrationReport::from(&MigrationOutcome::NothingToMigrate);
        assert_eq!(report.outcome, "nothingToMigrate");
        assert!(report.legacy_id.is_none());
    }

    #[test]
    fn test_restore_report() {
        let report = RestoreReport::from(&RestoreOutcome::TransportFailure("eof".into()));
        assert_eq!(report.outcome, "transportFailure");
        let text = OutputFormatter::new(OutputFormat::Table, false).format_restore(&report);
        assert_eq!(text, "Restore: transportFailure (eof)");
    }

    #[test]
    fn test_formatter_quiet_mode() {
        let formatter = OutputFormatter::new(OutputFormat::Quiet, false);
        assert!(formatter.is_quiet());
        assert!(formatter.success("done").is_empty());
        assert!(formatter.error("failed", ExitCode::GeneralError).is_empty());
    }

    #[test]
    fn test_info_only_when_verbose() {
        assert!(OutputFormatter::new(OutputFormat::Table, false).info("x").is_empty());
        assert_eq!(OutputFormatter::new(OutputFormat::Table, true).info("x"), "ℹ x");
    }
}
