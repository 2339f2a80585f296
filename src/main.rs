use std::net::SocketAddr;

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tower_http::cors::CorsLayer;
use tracing::info;

use erp_order_engine as engine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = engine::config::load_config().context("failed to load configuration")?;
    engine::config::init_tracing(cfg.log_level(), cfg.log_json);

    // `erp-order-engine migrate` applies the schema and exits.
    if std::env::args().nth(1).as_deref() == Some("migrate") {
        engine::migrator::run_migration(cfg.database_url()).await?;
        info!("migrations applied");
        return Ok(());
    }

    let store = engine::db::open_store(&cfg)
        .await
        .context("failed to open store")?;
    if cfg.uses_memory_store() {
        info!("using in-memory store; data is lost on shutdown");
    }

    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = engine::events::EventSender::new(event_tx);
    tokio::spawn(engine::events::process_events(event_rx));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    let cors_layer = if cfg.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::permissive()
    };

    let state = engine::AppState::new(store, cfg, Some(event_sender));
    let app = engine::app_router(state).layer(cors_layer);

    info!("erp-order-engine listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
