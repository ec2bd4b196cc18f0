use clap::Parser;
use ollama_cerebras_proxy::config::config_search_paths;
use ollama_cerebras_proxy::{build_router, AppState, ProxyConfig, UpstreamClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "ollama-cerebras-proxy",
    about = "Serve the Ollama API on top of Cerebras inference",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream model (overrides config and UPSTREAM_MODEL)
    #[arg(long)]
    model: Option<String>,

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
                .unwrap_or_else(|_| "ollama_cerebras_proxy=info,tower_http=info".into()),
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

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(model) = cli.model {
        config.upstream.model = model;
    }

    // Fail fast: no key, no server
    let api_key = config.resolve_api_key()?;
    let upstream = UpstreamClient::new(&config, api_key)?;

    info!("ollama-cerebras-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {}", upstream.url());
    info!("  Model:     {}", config.upstream.model);
    info!("  Port:      {}", config.port);

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        upstream,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OLLAMA_HOST=http://localhost:{} ollama run <anything>", port);

    axum::serve(listener, app).await?;

    Ok(())
}
