mod config;
mod models;
mod udp;
mod utils;

use log::{error, info};

use config::ListenerConfig;
use udp::open_listener;

/// Resolves on Ctrl+C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Got SIGINT, shutting down listener");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Got SIGTERM, shutting down listener");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match ListenerConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    info!(
        "Starting hub listener (buffer {} bytes, strict={})",
        config.buffer_size, config.strict
    );

    match open_listener(&config, shutdown_signal()).await {
        Ok(stats) => {
            info!(
                "Listener stopped after {} datagrams: {} obs_st, {} obs_air, {} obs_sky, {} ignored, {} invalid JSON, {} malformed",
                stats.received,
                stats.station,
                stats.air,
                stats.sky,
                stats.ignored,
                stats.invalid_json,
                stats.malformed
            );
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {}", e);
            Err(e.into())
        }
    }
}
