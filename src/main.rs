use clap::Parser;
use max_router::config::config_search_paths;
use max_router::{build_router, AppState, ModelMapper, RouterConfig, SharedLogger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "max-router",
    about = "OpenAI-compatible front door for Anthropic models, with model name routing",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log file path
    #[arg(long, default_value = "max-router.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,

    /// Print how a model name would be routed and exit
    #[arg(long, value_name = "MODEL")]
    explain: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "max_router=info,tower_http=info".into()),
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

    let mut config = RouterConfig::find_and_load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    config.validate()?;

    let mapper = ModelMapper::from_config(
        &config.mappings,
        config.tiers.clone(),
        config.resolve_model_override(),
    );

    if let Some(ref model) = cli.explain {
        let resolution = mapper.resolve_with_reason(model);
        println!("{} -> {} ({})", model, resolution.model, resolution.reason);
        return Ok(());
    }

    let logger = SharedLogger::new(&cli.log_file)?;

    info!("max-router v{}", env!("CARGO_PKG_VERSION"));
    info!("  Upstream:  {}", config.upstream.base_url);
    info!("  Port:      {}", config.port);
    info!(
        "  Tiers:     high={} default={} low={}",
        config.tiers.high, config.tiers.default, config.tiers.low
    );
    info!(
        "  Mappings:  {} (reload={})",
        mapper.source_description(),
        config.mappings.reload.as_str()
    );
    if let Some(model) = mapper.default_override() {
        info!("  Override:  {} (from {})", model, config.mappings.override_env);
    }
    info!(
        "  Auth:      {}",
        if config.resolve_api_key().is_some() { "configured key" } else { "forwarded from client" }
    );
    info!("  Log file:  {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting max-router upstream={} port={} reload={}",
            config.upstream.base_url,
            config.port,
            config.mappings.reload.as_str()
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.upstream.timeout_secs))
        .build()?;

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        client,
        logger,
        mapper: Arc::new(mapper),
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  OPENAI_BASE_URL=http://localhost:{}/v1", port);

    axum::serve(listener, app).await?;

    Ok(())
}
