use rtms_scribe::http;
use rtms_scribe::{AppConfig, AppService};
use std::sync::Arc;

/// Initialize the application: logger, configuration, adapters, workers
async fn run() -> rtms_scribe::Result<()> {
    let config = AppConfig::from_env()?;

    env_logger::Builder::new()
        .filter_level(config.log_level.to_filter())
        .parse_default_env()
        .init();

    let bind_addr = config.bind_addr.clone();
    let (service, events) = AppService::build(config)?;

    // Background workers: session event fan-out and transcript triggers
    service.spawn_event_dispatcher(events);
    service.pipeline.spawn_driver();

    let app = http::build_router(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    log::info!("rtms-scribe listening on {}", bind_addr);

    let shutdown_service = Arc::clone(&service);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutdown signal received");
            shutdown_service.shutdown().await;
        })
        .await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("rtms-scribe failed to start: {}", error);
        std::process::exit(1);
    }
}
