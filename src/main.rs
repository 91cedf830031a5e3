use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use roost::clock::SystemClock;
use roost::compactor;
use roost::config::ServerConfig;
use roost::engine::Engine;
use roost::market::Marketplace;
use roost::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env();
    roost::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let engine = Arc::new(Engine::open(&config.wal_path())?);
    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });

    let market = Arc::new(Marketplace::from_engine(
        engine,
        Arc::new(SystemClock),
        config.policy.clone(),
    ));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roost listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {}", config.max_connections);
    info!(
        "  self booking: {}, past dates: {}, max stay: {} nights",
        if config.policy.allow_self_booking { "allowed" } else { "refused" },
        if config.policy.reject_past_dates { "refused" } else { "allowed" },
        config.policy.max_stay_nights
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };

    wire::serve(
        listener,
        market,
        config.max_connections,
        Duration::from_secs(10),
        shutdown,
    )
    .await;

    info!("roost stopped");
    Ok(())
}
