use ticker_server::{AppConfig, SourceConfig, TickerServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn print_help() {
    eprintln!(
        r#"Ticker Server - real-time price streams over WebSocket

USAGE:
    ticker-server [OPTIONS]

OPTIONS:
    --config <PATH>     Load configuration from JSON file
    --help              Print this help message

ENVIRONMENT VARIABLES:
    HOST                Server host (default: 0.0.0.0)
    PORT                Server port (default: 4000)
    POLL_INTERVAL       Milliseconds between price reads (default: 1000)
    MIN_PRICE_RANGE     Prices at or below are discarded (default: 0.01)
    MAX_PRICE_RANGE     Prices at or above are discarded (default: 1000000)
    MAX_RESOURCES       Pooled source contexts (default: 16)
    PRICE_SOURCE_URL    Poll this URL ({{symbol}} is substituted) instead of
                        the built-in simulator
    RUST_LOG            Log level filter

EXAMPLES:
    # Run with the simulated source
    ticker-server

    # Run with config file
    ticker-server --config ticker.json

    # Poll a JSON quote endpoint
    PRICE_SOURCE_URL='https://quotes.example/api/{{symbol}}' ticker-server
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ticker_server=info,ticker_streaming=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                config_path = Some(args[i].clone());
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path);
            AppConfig::from_file(&path)?
        }
        None => {
            tracing::info!("Using default configuration");
            AppConfig::default()
        }
    };
    config.apply_env()?;

    let server = TickerServer::new(config)?;

    tracing::info!("Starting Ticker Server");
    tracing::info!(
        "WebSocket: ws://{}:{}/ws",
        server.config.server.host,
        server.config.server.port
    );
    tracing::info!(
        max_resources = server.config.streaming.max_resources,
        poll_interval_ms = server.config.streaming.poll_interval_ms,
        simulated = matches!(server.config.source, SourceConfig::Simulated(_)),
        "Streaming settings"
    );
    tracing::info!("Available endpoints:");
    tracing::info!("  GET  /health");
    tracing::info!("  GET  /api/stats");
    tracing::info!("  POST /api/unsubscribe");
    tracing::info!("  GET  /ws");

    server.run().await
}
