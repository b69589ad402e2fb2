//! ZTG Daemon - Main Entry Point

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use ztg_common::ZtgConfig;
use ztg_dpi::{DpiEngine, PatternAutomaton, VerdictServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ztgd v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "/etc/ztg/ztgd.json".into());
    let config = ZtgConfig::load(&config_path).unwrap_or_else(|_| {
        tracing::warn!(path = %config_path, "config not found, using defaults");
        ZtgConfig::default()
    });

    let engine = match &config.dpi.signature_file {
        Some(path) => match ztg_dpi::load_signature_file(Path::new(path)) {
            Ok((signatures, stats)) => {
                tracing::info!(
                    loaded = stats.loaded,
                    skipped = stats.skipped,
                    path = %path,
                    "signature set loaded"
                );
                DpiEngine::from_signatures(signatures)
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "signature file unavailable, starting empty");
                DpiEngine::new(PatternAutomaton::build(Vec::new()))
            }
        },
        None => DpiEngine::new(PatternAutomaton::build(Vec::new())),
    };

    let server = VerdictServer::new(Arc::new(engine), config.dpi.max_frame_bytes);
    server.bind_and_serve(&config.dpi.listen_addr).await?;

    Ok(())
}
