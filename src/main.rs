//! loginbridge binary: serves the login session gateway.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rand::RngCore;
use rand::rngs::OsRng;
use tracing_subscriber::EnvFilter;

use loginbridge::Config;
use loginbridge::auth::{
    AgentActivator, CommandConnector, HttpAgentActivator, LoginDefaults, SessionRegistry,
};
use loginbridge::config::LogFormat;
use loginbridge::error::{ConfigError, GatewayError};
use loginbridge::gateway::{GatewayState, start_server};
use loginbridge::settings::Settings;

#[derive(Parser)]
#[command(name = "loginbridge", version, about = "Interactive login gateway for hosted messaging agents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway (default).
    Serve {
        /// TOML config file (defaults to ~/.loginbridge/config.toml).
        #[arg(long, env = "LOGINBRIDGE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Inspect or create the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Resolve the effective configuration and print it with secrets masked.
    Check {
        #[arg(long, env = "LOGINBRIDGE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Write a config file populated with the defaults.
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    loginbridge::bootstrap::load_env_files();
    let cli = Cli::parse();
    init_tracing(LogFormat::from_env()?);

    match cli.command.unwrap_or(Command::Serve { config: None }) {
        Command::Serve { config } => Ok(serve(config).await?),
        Command::Config {
            action: ConfigCommand::Check { config },
        } => {
            let config = Config::from_env_with_toml(config.as_deref())?;
            for line in config.summary_lines() {
                println!("{line}");
            }
            if let Err(e) = config.login_helper.require_command() {
                println!("\nwarning: {e}");
            }
            Ok(())
        }
        Command::Config {
            action: ConfigCommand::Init { path, force },
        } => {
            let path = path.unwrap_or_else(Settings::default_toml_path);
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            Settings::default()
                .save_toml(&path)
                .map_err(anyhow::Error::msg)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("loginbridge=info,tower_http=info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn serve(config_path: Option<PathBuf>) -> loginbridge::Result<()> {
    let config = Config::from_env_with_toml(config_path.as_deref())?;
    let helper_command = config.login_helper.require_command()?.to_string();

    let activator: Option<Arc<dyn AgentActivator>> = match &config.deployment {
        Some(deployment) => {
            tracing::info!(api_url = %deployment.api_url, "Agent activation enabled");
            Some(Arc::new(HttpAgentActivator::new(deployment)?))
        }
        None => {
            tracing::info!("DEPLOYMENT_API_URL not set, agent activation disabled");
            None
        }
    };

    let registry = SessionRegistry::new(
        config.sessions.clone(),
        Arc::new(CommandConnector::new(helper_command)),
        activator,
        LoginDefaults {
            api_id: config.login_helper.default_api_id,
            api_hash: config.login_helper.default_api_hash.clone(),
        },
    );

    let auth_token = match config.gateway.auth_token.clone() {
        Some(token) => token,
        None => {
            let token = generate_token();
            tracing::warn!("GATEWAY_AUTH_TOKEN not set, generated a token for this run");
            // Shown once on the terminal, never through the log pipeline.
            eprintln!("Gateway auth token for this run: {token}");
            token
        }
    };

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidValue {
            key: "GATEWAY_HOST".to_string(),
            message: format!(
                "{}:{} is not a socket address: {e}",
                config.gateway.host, config.gateway.port
            ),
        })?;
    let state = GatewayState::new(Arc::clone(&registry));
    start_server(addr, Arc::clone(&state), auth_token).await?;
    tracing::info!(
        max_sessions = config.sessions.max_concurrent,
        ttl_secs = config.sessions.ttl.as_secs(),
        "loginbridge ready"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(GatewayError::ShutdownSignal)?;
    tracing::info!("Shutdown requested");
    state.shutdown().await;
    registry.shutdown().await;
    Ok(())
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
