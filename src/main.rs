// =============================================================================
// meridian-engine — Main Entry Point
// =============================================================================
//
// Loads runtime config, wires the engine with its reference strategy, starts
// the query server alongside it, and runs until SIGINT or the engine's own
// shutdown flag is flipped.
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use meridian_engine::config::RuntimeConfig;
use meridian_engine::engine::Engine;
use meridian_engine::provider::WsTradeAdapter;
use meridian_engine::strategy::ReferenceStrategy;
use meridian_engine::types::Source;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("meridian-engine starting up");

    let config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        info!(error = %e, path = CONFIG_PATH, "no usable runtime config found, starting from defaults");
        RuntimeConfig::default()
    });

    let engine = Engine::new(
        config.clone(),
        Arc::new(Mutex::new(ReferenceStrategy::new())),
        Source::Live,
    );

    for symbol in &config.symbols {
        let adapter = Arc::new(WsTradeAdapter::new(
            format!("ws:{symbol}"),
            "wss://stream.example.com/ws",
        ));
        engine.provider.attach(adapter);
    }

    engine.start().await;

    let bind_addr = config.bind_addr.clone();
    let server_engine = engine.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = meridian_engine::server::serve(&bind_addr, server_engine).await {
            error!(error = %e, "query server exited with an error");
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to install ctrl-c handler");
            }
            info!("shutdown signal received");
        }
        _ = engine.wait_for_shutdown() => {
            info!("engine-initiated shutdown");
        }
    }

    engine.request_shutdown();
    engine.shutdown().await;
    server_handle.abort();

    info!("meridian-engine stopped");
    Ok(())
}
