use clap::Parser;
use dialect_bridge::config::config_search_paths;
use dialect_bridge::{build_router, AppState, GatewayConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "dialect-bridge",
    about = "Universal LLM gateway: speak OpenAI, Anthropic or Gemini to any backend",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Backend preset name (overrides config)
    #[arg(long)]
    backend: Option<String>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dialect_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(name) = cli.backend {
        config.backend.switch_to(name);
    }

    let base_url = config.backend.effective_base_url()?;
    let _api_key = config.backend.resolve_api_key()?;

    info!(version = env!("CARGO_PKG_VERSION"), "dialect-bridge starting");
    info!("  Backend:   {}", config.backend.name);
    info!("  Base URL:  {}", base_url);
    info!("  Format:    {}", config.backend.effective_format());
    if let Some(model) = &config.backend.model {
        info!("  Model:     {} (forced)", model);
    }
    info!("  Models:    {} mapped", config.models.len());
    info!("  Reasoning: {} overrides", config.reasoning.len());

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState { config, client });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OpenAI:    POST /v1/chat/completions");
    info!("  Anthropic: POST /v1/messages");
    info!("  Gemini:    POST /v1beta/models/{{model}}:generateContent");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
