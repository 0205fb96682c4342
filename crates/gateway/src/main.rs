use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use aria_domain::config::{AppConfig, ConfigSeverity};
use aria_gateway::context::ContextTemplate;
use aria_gateway::hub::sweeper::spawn_sweeper;
use aria_gateway::hub::ws::client_ws;
use aria_gateway::AppState;

const HF_MIRROR_ENDPOINT: &str = "https://hf-mirror.com";

#[derive(Parser, Debug)]
#[command(name = "ariaserver", about = "Real-time voice-first conversational assistant server")]
struct Args {
    /// Raise the console log level to debug.
    #[arg(long)]
    verbose: bool,

    /// Route Hugging Face downloads through the mirror endpoint.
    #[arg(long = "hf_mirror")]
    hf_mirror: bool,

    /// Path to the YAML configuration file.
    #[arg(default_value = "conf.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // ── Tracing ────────────────────────────────────────────────────
    let default_filter = if args.verbose {
        "aria_gateway=debug,aria_agent=debug,aria_mcp_client=debug,aria_engines=debug"
    } else {
        "aria_gateway=info,aria_agent=info,aria_mcp_client=info,aria_engines=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    tracing::info!("aria-server starting");

    if args.hf_mirror {
        std::env::set_var("HF_ENDPOINT", HF_MIRROR_ENDPOINT);
        tracing::info!(endpoint = HF_MIRROR_ENDPOINT, "Hugging Face mirror enabled");
    }

    // ── Config ─────────────────────────────────────────────────────
    let config = AppConfig::load(&args.config)
        .map_err(|e| anyhow::anyhow!("failed to load config '{}': {e}", args.config))?;

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    tracing::info!(
        host = %config.system.host,
        port = config.system.port,
        conf_name = %config.character.conf_name,
        wake_word_enabled = config.system.wake_word_enabled,
        "configuration loaded"
    );

    let host = config.system.host.clone();
    let port = config.system.port;

    // ── Default context template (engines + MCP discovery) ─────────
    let template = Arc::new(ContextTemplate::initialize(config).await?);
    let state = AppState::new(template);

    // ── Heartbeat sweeper ──────────────────────────────────────────
    spawn_sweeper(state.connections.clone());

    // ── Router ─────────────────────────────────────────────────────
    let app = axum::Router::new()
        .route("/client-ws", axum::routing::get(client_ws))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // ── Server ─────────────────────────────────────────────────────
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server address {host}:{port}: {e}"))?;

    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
