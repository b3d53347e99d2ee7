//! CLI command definitions and argument parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use qsso_core::types::{amazon_q_scopes, BUILDER_ID_REGION, BUILDER_ID_START_URL};
use qsso_core::{AuthError, AuthRegistry, AuthState, Connection, ConnectionStateEvent, RestoreOutcome};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::output::{
    MigrationReport, OutputFormat, OutputFormatter, RestoreReport, StatusReport, TokenReport,
};
use crate::runtime::{settle, Runtime};
use crate::ExitCode;

/// qsso - Amazon Q single sign-on connections from the terminal
#[derive(Parser, Debug)]
#[command(name = "qsso")]
#[command(version, about = "Manage Amazon Q SSO connections through the language server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (overrides the config file)
    #[arg(long, global = true)]
    pub output: Option<OutputFormat>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (protocol-level tracing)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true, env = "QSSO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Language server executable (overrides the config file)
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Profile name the connection is registered under
    #[arg(long, global = true)]
    pub profile: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in to Builder ID or an IAM Identity Center start URL
    Login(LoginArgs),
    /// Sign in again with the current connection's attributes
    Reauth,
    /// Sign out and forget the connection
    Logout,
    /// Show the connection state
    Status,
    /// Fetch a bearer token for the current connection
    Token(TokenArgs),
    /// Restore a cached session
    Restore,
    /// Import a connection from the legacy multi-connection store
    Migrate,
    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Start URL (defaults to Builder ID)
    #[arg(long)]
    pub start_url: Option<String>,

    /// Identity Center region
    #[arg(long)]
    pub region: Option<String>,

    /// Scope to request (repeatable, defaults to the Amazon Q scopes)
    #[arg(long = "scope")]
    pub scopes: Vec<String>,
}

impl LoginArgs {
    /// Start URL, region and scopes with defaults applied.
    pub fn resolve(&self) -> (String, String, Vec<String>) {
        let start_url = self
            .start_url
            .clone()
            .unwrap_or_else(|| BUILDER_ID_START_URL.to_string());
        let region = self
            .region
            .clone()
            .unwrap_or_else(|| BUILDER_ID_REGION.to_string());
        let scopes = if self.scopes.is_empty() {
            amazon_q_scopes()
        } else {
            self.scopes.clone()
        };
        (start_url, region, scopes)
    }
}

#[derive(Args, Debug)]
pub struct TokenArgs {
    /// Print the bearer token itself
    #[arg(long)]
    pub show: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a sample config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

impl Cli {
    /// Execute the CLI command with a pre-loaded configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let format: OutputFormat = config.output.format.parse().unwrap_or_default();
        let formatter = OutputFormatter::new(format, config.output.verbose);

        let command = match self.command {
            Commands::Config(cmd) => return run_config(cmd, self.config, &config, &formatter),
            other => other,
        };

        let runtime = Runtime::start(&config, formatter.is_quiet()).await?;
        let result = run_command(command, &runtime, &formatter).await;
        runtime.shutdown().await;

        match result {
            Ok(code) => Ok(code),
            Err(e) => {
                let code = ExitCode::from_auth_error(&e);
                emit(&formatter.error(&e.to_string(), code));
                Ok(code)
            }
        }
    }
}

fn emit(text: &str) {
    if !text.is_empty() {
        println!("{text}");
    }
}

async fn run_command(
    command: Commands,
    runtime: &Runtime,
    formatter: &OutputFormatter,
) -> Result<ExitCode, AuthError> {
    let registry = runtime.registry();
    let mut events = registry.subscribe();

    match command {
        Commands::Login(args) => {
            let (start_url, region, scopes) = args.resolve();
            if !formatter.is_quiet() {
                eprintln!("Complete sign-in in your browser. Press Ctrl-C to cancel.");
            }
            let login = registry.login(&start_url, &region, scopes);
            tokio::pin!(login);
            let connection = tokio::select! {
                result = &mut login => result?,
                _ = tokio::signal::ctrl_c() => {
                    info!("sign-in interrupted");
                    registry.cancel_login();
                    login.await?
                }
            };
            settle(&mut events).await;
            emit(&formatter.success(&format!("Connected to {}", connection.start_url)));
            Ok(ExitCode::Success)
        }
        Commands::Reauth => {
            restore_session(registry, &mut events).await;
            let reauth = registry.reauthenticate();
            tokio::pin!(reauth);
            tokio::select! {
                result = &mut reauth => result?,
                _ = tokio::signal::ctrl_c() => {
                    registry.cancel_login();
                    reauth.await?
                }
            };
            settle(&mut events).await;
            emit(&formatter.success("Reauthenticated"));
            Ok(ExitCode::Success)
        }
        Commands::Logout => {
            restore_session(registry, &mut events).await;
            let was_connected = registry.connection().is_some();
            registry.logout().await?;
            if was_connected {
                settle(&mut events).await;
            }
            emit(&formatter.success("Signed out"));
            Ok(ExitCode::Success)
        }
        Commands::Status => {
            let outcome = restore_session(registry, &mut events).await;
            if matches!(outcome, RestoreOutcome::TransportFailure(_)) {
                warn!(?outcome, "could not query the language server");
            }
            let report = StatusReport::new(registry.auth_state(), registry.connection().as_ref());
            emit(&formatter.format_status(&report));
            Ok(state_exit_code(report.state))
        }
        Commands::Token(args) => {
            restore_session(registry, &mut events).await;
            let bundle = registry.get_token().await?;
            let token_id = match registry.connection() {
                Some(Connection::Sso(c)) => c.token_id,
                _ => None,
            };
            emit(&formatter.format_token(&TokenReport::new(&bundle, token_id, args.show)));
            Ok(ExitCode::Success)
        }
        Commands::Restore => {
            let outcome = restore_session(registry, &mut events).await;
            emit(&formatter.format_restore(&RestoreReport::from(&outcome)));
            Ok(match outcome {
                RestoreOutcome::Restored => ExitCode::Success,
                RestoreOutcome::Expired => ExitCode::Expired,
                RestoreOutcome::NoSession => ExitCode::NotConnected,
                RestoreOutcome::TransportFailure(_) => ExitCode::ServerUnavailable,
            })
        }
        Commands::Migrate => {
            let outcome = registry.migrate_legacy().await?;
            emit(&formatter.format_migration(&MigrationReport::from(&outcome)));
            Ok(ExitCode::Success)
        }
        Commands::Config(_) => Err(AuthError::Unsupported("config")),
    }
}

/// Restore the cached session and let the registry finish reacting to it.
async fn restore_session(
    registry: &AuthRegistry,
    events: &mut broadcast::Receiver<ConnectionStateEvent>,
) -> RestoreOutcome {
    let outcome = registry.restore().await;
    if matches!(outcome, RestoreOutcome::Restored | RestoreOutcome::Expired) {
        settle(events).await;
    }
    outcome
}

fn state_exit_code(state: AuthState) -> ExitCode {
    match state {
        AuthState::Connected => ExitCode::Success,
        AuthState::Expired => ExitCode::Expired,
        AuthState::NotConnected => ExitCode::NotConnected,
    }
}

fn run_config(
    command: ConfigCommand,
    custom_path: Option<PathBuf>,
    config: &Config,
    formatter: &OutputFormatter,
) -> anyhow::Result<ExitCode> {
    match command {
        ConfigCommand::Init { force } => {
            let path = custom_path
                .or_else(Config::default_path)
                .ok_or_else(|| anyhow::anyhow!("could not determine the config directory"))?;
            if path.exists() && !force {
                emit(&formatter.warning(&format!(
                    "{} already exists, use --force to overwrite",
                    path.display()
                )));
                return Ok(ExitCode::InvalidInput);
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, Config::sample_toml())?;
            emit(&formatter.success(&format!("Wrote {}", path.display())));
        }
        ConfigCommand::Show => match formatter.format() {
            OutputFormat::Json => emit(&serde_json::to_string_pretty(config)?),
            OutputFormat::Table => emit(&toml::to_string_pretty(config)?),
            OutputFormat::Quiet => {}
        },
    }
    Ok(ExitCode::Success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login() {
        let cli = Cli::try_parse_from([
            "qsso",
            "login",
            "--start-url",
            "https://d-123.awsapps.com/start",
            "--region",
            "eu-west-1",
            "--scope",
            "sso:account:access",
        ])
        .unwrap();
        match cli.command {
            Commands::Login(args) => {
                let (url, region, scopes) = args.resolve();
                assert_eq!(url, "https://d-123.awsapps.com/start");
                assert_eq!(region, "eu-west-1");
                assert_eq!(scopes, vec!["sso:account:access"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_login_defaults_to_builder_id() {
        let cli = Cli::try_parse_from(["qsso", "login"]).unwrap();
        let Commands::Login(args) = cli.command else {
            panic!("expected login");
        };
        let (url, region, scopes) = args.resolve();
        assert_eq!(url, BUILDER_ID_START_URL);
        assert_eq!(region, BUILDER_ID_REGION);
        assert_eq!(scopes, amazon_q_scopes());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["qsso", "status", "--output", "json", "--debug"]).unwrap();
        assert_eq!(cli.output, Some(OutputFormat::Json));
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_token_show_flag() {
        let cli = Cli::try_parse_from(["qsso", "token", "--show"]).unwrap();
        assert!(matches!(cli.command, Commands::Token(TokenArgs { show: true })));
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["qsso", "config", "init", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::Config(ConfigCommand::Init { force: true })));
        let cli = Cli::try_parse_from(["qsso", "config", "show"]).unwrap();
        assert!(matches!(cli.command, Commands::Config(ConfigCommand::Show)));
    }

    #[test]
    fn test_invalid_output_format_rejected() {
        assert!(Cli::try_parse_from(["qsso", "status", "--output", "xml"]).is_err());
    }

    #[test]
    fn test_state_exit_code() {
        assert_eq!(state_exit_code(AuthState::Connected), ExitCode::Success);
        assert_eq!(state_exit_code(AuthState::Expired), ExitCode::Expired);
        assert_eq!(state_exit_code(AuthState::NotConnected), ExitCode::NotConnected);
    }

    #[tokio::test]
    async fn test_config_init_writes_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qsso").join("config.toml");
        let formatter = OutputFormatter::new(OutputFormat::Quiet, false);

        let code = run_config(
            ConfigCommand::Init { force: false },
            Some(path.clone()),
            &Config::default(),
            &formatter,
        )
        .unwrap();
        assert_eq!(code, ExitCode::Success);
        assert!(Config::load(&path).is_ok());

        let code = run_config(
            ConfigCommand::Init { force: false },
            Some(path),
            &Config::default(),
            &formatter,
        )
        .unwrap();
        assert_eq!(code, ExitCode::InvalidInput);
    }
}
