use membership_service::{
    build_router,
    config::MembershipConfig,
    services::{metrics, Database, RedisTokenCache, SmtpMailer},
    workers::NotificationScheduler,
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = MembershipConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting membership service"
    );

    let db = Database::new(&config.database).await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized successfully");

    let cache = RedisTokenCache::new(&config.redis)
        .await
        .map_err(AppError::CacheError)?;
    tracing::info!("Token cache initialized");

    let mailer = SmtpMailer::new(config.smtp.clone())
        .map_err(|e| AppError::EmailError(e.to_string()))?;
    tracing::info!("SMTP mailer initialized");

    let state = AppState::new(
        Arc::new(db),
        Arc::new(cache),
        Arc::new(mailer),
        &config.jwt,
    );

    let shutdown = CancellationToken::new();
    let scheduler = NotificationScheduler::new(
        state.store.clone(),
        state.mailer.clone(),
        state.tokens.clone(),
        config.scheduler.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let app = build_router(state, &config.security.allowed_origins);

    let addr: SocketAddr = config
        .common
        .bind_address()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid bind address: {}", e)))?;
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        tracing::error!(error = %e, "Notification scheduler task failed");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
