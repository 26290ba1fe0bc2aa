use anyhow::Context;
use screenshot_server::{
    AdmissionController, AppState, CdpBackend, Config, LogFormat, Metrics, OutcomeReporter,
    RenderBackend, RenderService,
};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    setup_logging(&config)?;

    info!("starting screenshot-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        max_workers = config.max_workers,
        capture_deadline_secs = config.capture_deadline.as_secs(),
        "admission limits configured"
    );

    // Wire the metric handles once and hand references down; nothing below
    // registers metrics on its own.
    let metrics = Arc::new(Metrics::install().context("failed to install metrics recorder")?);
    let admission = Arc::new(AdmissionController::new(
        config.max_workers,
        metrics.clone(),
    ));
    let backend: Arc<dyn RenderBackend> = Arc::new(CdpBackend::new(config.clone()));
    let reporter = OutcomeReporter::new(metrics.clone());
    let service = Arc::new(RenderService::from_config(
        backend,
        admission.clone(),
        reporter,
        &config,
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        service,
        admission,
        metrics,
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!("listening on http://0.0.0.0:{}", config.port);

    axum::serve(listener, screenshot_server::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("screenshot-server stopped");
    Ok(())
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log level: {}", config.log_level))?;

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
        Ok(signal) => signal,
        Err(e) => {
            tracing::error!("failed to install SIGINT handler: {e}");
            return std::future::pending().await;
        }
    };
    let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(signal) => signal,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {e}");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
}
