use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use neon_swarm_core::{ApiClient, ApiMessage, Session, Swarm, run_turn};

mod config;

use config::SwarmConfig;

#[derive(Parser)]
#[command(name = "neon-swarm")]
#[command(version)]
#[command(about = "Talk to your Neon projects and databases")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration with secrets masked
    Config,

    /// Interactive session
    Chat {
        /// Start with the query executor; takes a connection URI or falls
        /// back to [database].connection_uri / DATABASE_URL
        #[arg(long, num_args = 0..=1, value_name = "URI")]
        query: Option<Option<String>>,
    },

    /// Send a one-shot message
    Ask {
        /// The message to send
        message: String,

        #[arg(long, num_args = 0..=1, value_name = "URI")]
        query: Option<Option<String>>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Best effort: a missing .env is normal
    dotenv::dotenv().ok();

    let filter = if cli.debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Chat { query } => cmd_chat(&cli.config, query).await,
        Commands::Ask { message, query } => cmd_ask(&cli.config, &message, query).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("neon-swarm initialized at {}", config_dir.display());
    println!(
        "Set NEON_API_KEY and ANTHROPIC_API_KEY, or edit {}.",
        config_path.display()
    );
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwarmConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

fn build_model(cfg: &SwarmConfig) -> Result<ApiClient> {
    let client = ApiClient::new(cfg.model.api_key.clone(), Some(cfg.model.model.clone()))
        .context("Model client unavailable; set ANTHROPIC_API_KEY")?
        .with_max_tokens(cfg.model.max_tokens)
        .with_base_url(cfg.model.base_url.clone());
    Ok(client)
}

/// Build the swarm and run the init entry point for the starting role
async fn open_session(cfg: &SwarmConfig, query: Option<Option<String>>) -> Result<Session> {
    let neon_key = (!cfg.neon.api_key.is_empty()).then(|| cfg.neon.api_key.clone());
    let swarm = Swarm::neon(
        &cfg.neon.base_url,
        Duration::from_secs(cfg.neon.request_timeout_secs),
    )?
    .with_api_key(neon_key);

    let (agent, ctx) = match query {
        None => swarm
            .control_plane_agent_init(&cfg.neon.api_key)
            .await
            .context("Control-plane initialization failed; check NEON_API_KEY")?,
        Some(uri) => {
            let uri = uri
                .or_else(|| cfg.database.connection_uri.clone())
                .context("No connection URI: pass --query <URI> or set DATABASE_URL")?;
            swarm
                .query_execution_agent_init(&uri)
                .await
                .context("Query-execution initialization failed")?
        }
    };

    info!("Starting as {}", agent.name());
    Ok(swarm.session(agent, ctx))
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    message: &str,
    query: Option<Option<String>>,
) -> Result<()> {
    let cfg = SwarmConfig::load(config_path)?;
    let model = build_model(&cfg)?;
    let mut session = open_session(&cfg, query).await?;

    let mut history = Vec::new();
    let result = run_turn(
        &model,
        &mut session,
        &mut history,
        message,
        cfg.model.max_iterations,
    )
    .await;
    session.close().await;

    let output = result?;
    println!("{}", output.text);
    Ok(())
}

async fn cmd_chat(config_path: &Option<PathBuf>, query: Option<Option<String>>) -> Result<()> {
    let cfg = SwarmConfig::load(config_path)?;
    let model = build_model(&cfg)?;
    let mut session = open_session(&cfg, query).await?;

    println!("Connected as {}. /agent, /reset, /quit", session.active_agent().name());

    let mut history: Vec<ApiMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("[{}] > ", session.active_role());
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = signal::ctrl_c() => {
                println!();
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/agent" => {
                println!("{}", session.active_agent().name());
                continue;
            }
            "/reset" => {
                session.reset().await;
                history.clear();
                println!("Connection closed and project selection cleared.");
                continue;
            }
            _ => {}
        }

        match run_turn(
            &model,
            &mut session,
            &mut history,
            input,
            cfg.model.max_iterations,
        )
        .await
        {
            Ok(output) => {
                println!("{}", output.text);
                info!(
                    "Turn done: {} tool calls, tokens in={} out={}",
                    output.tool_calls, output.usage.input_tokens, output.usage.output_tokens
                );
            }
            // Completed tool results stay in history for the next turn
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }

    session.close().await;
    info!("Session closed");
    Ok(())
}
