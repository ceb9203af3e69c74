use clap::Parser;
use cosmos_reduce::build_router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "cosmos-reduce")]
#[command(about = "Dimensionality-reduction microservice (UMAP learning/transform, Ridge surrogate, matrix construction)")]
#[command(version)]
struct Args {
    /// HTTP server port
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// HTTP server bind address (overrides port)
    #[arg(short, long)]
    address: Option<String>,

    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    info!("Starting Cosmos Reduce service");
    info!("  Version: {}", env!("CARGO_PKG_VERSION"));

    let availability = cosmos_reduce::health::availability();
    info!(
        "Library availability: umap={} sklearn={} serialization={}",
        availability.umap_available, availability.sklearn_available, availability.serialization_available
    );

    let addr: SocketAddr = match args.address {
        Some(address) => address
            .parse()
            .map_err(|e| format!("Invalid address '{}': {}", address, e))?,
        None => format!("0.0.0.0:{}", args.port).parse()?,
    };

    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("Listening on {}", local_addr);

    let app = build_router();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
