//! Presentation Export Service
//!
//! Accepts presentation uploads over HTTP and returns them exported to PDF by
//! a single LibreOffice engine shared by all requests.
//!
//! ## Architecture
//!
//! - **HTTP**: axum, `POST /powerpoint/export_as_fixed_format2/`
//! - **Engine**: one lazily launched `soffice` handle, leased exclusively
//! - **Staging**: one temporary workspace per request under `WORKSPACE_ROOT`
//! - **Telemetry**: OpenTelemetry OTLP export
//!
//! ## Configuration
//!
//! See [`ppt_export_server::config`] for the full list. Commonly used:
//! - `BIND_ADDR`: listen address (default: 0.0.0.0:8000)
//! - `SOFFICE_PATH`: LibreOffice executable (default: soffice)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP collector endpoint
//! - `RUST_LOG`: Log level (default: info)
//! - `LOG_FORMAT`: `json` for JSON log lines

use anyhow::{Context, Result};
use ppt_export_server::config::ServiceConfig;
use ppt_export_server::engine::soffice_factory;
use ppt_export_server::error::ErrorTranslator;
use ppt_export_server::resource::ResourceManager;
use ppt_export_server::routes::{self, AppState};
use ppt_export_server::service::ConversionService;
use ppt_export_server::telemetry;
use ppt_export_server::workspace::WorkspaceManager;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // Initialize OpenTelemetry
    if let Err(e) = telemetry::init_telemetry() {
        warn!("Failed to initialize telemetry: {}", e);
    }

    info!("Starting presentation export service v{}", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::from_env().context("Failed to load configuration")?;
    info!(
        "Configuration: bind_addr={}, workspace_root={}, soffice={}, policy={:?}",
        config.bind_addr,
        config.workspace_root.display(),
        config.soffice.program.display(),
        config.rejection_policy
    );

    std::fs::create_dir_all(&config.workspace_root).with_context(|| {
        format!(
            "Failed to create workspace root {}",
            config.workspace_root.display()
        )
    })?;

    let resources = Arc::new(
        ResourceManager::new(soffice_factory(config.soffice.clone()))
            .with_acquire_timeout(config.acquire_timeout),
    );
    let service = ConversionService::new(
        resources.clone(),
        WorkspaceManager::new(&config.workspace_root),
        config.export.clone(),
    )
    .with_staging_extension(config.staging_extension.clone())
    .with_session_timeout(config.session_timeout);

    let state = AppState::new(service, ErrorTranslator::new(config.rejection_policy));
    let app = routes::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on {}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Server stopped, shutting down document engine");
    resources.shutdown().await;
    telemetry::record_engine_stats(&resources.stats());
    telemetry::shutdown_telemetry();

    served.context("Server error")?;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
