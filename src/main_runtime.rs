use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use leadmarket::api::{create_router, AppState};
use leadmarket::config::{AppConfig, LoggingConfig};
use leadmarket::error::{MarketError, Result};
use leadmarket::identity::{HmacIdentityProvider, Role};
use leadmarket::ledger::{LedgerStore, MemoryLedger, PostgresLedger};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,leadmarket=debug,sqlx=warn"));

    // LEADMARKET_LOG_DIR wins over logging.dir; no directory means console only.
    let log_dir = std::env::var("LEADMARKET_LOG_DIR")
        .ok()
        .or_else(|| logging.dir.clone());

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial file, so check writability first.
    let file_layer = log_dir.as_deref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir, e
            );
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".leadmarket_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(log_dir, "leadmarket.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Keep the guard alive for the life of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let console_layer = if logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed()
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if file_logging_enabled {
        if let Some(dir) = log_dir {
            eprintln!("Logging to: {}/leadmarket.log", dir);
        }
    }
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

pub fn load_config(dir: &str) -> Result<AppConfig> {
    let config = AppConfig::load_from(dir)?;
    if let Err(errors) = config.validate() {
        // Logging is not up yet
        for e in &errors {
            eprintln!("config: {}", e);
        }
        return Err(MarketError::Validation(errors.join("; ")));
    }
    Ok(config)
}

/// Sign a bearer token for `user_id` acting as `role`.
pub fn issue_token(config: &AppConfig, user_id: i64, role: &str) -> anyhow::Result<String> {
    let role = Role::try_from(role).map_err(anyhow::Error::msg)?;
    let token = HmacIdentityProvider::new(&config.auth.token_secret)
        .issue_token(user_id, role)
        .with_context(|| format!("failed to issue token for user {user_id}"))?;
    Ok(token)
}

pub async fn connect_postgres(config: &AppConfig) -> Result<PostgresLedger> {
    PostgresLedger::connect(&config.database.url, config.database.max_connections).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Run the API server and maintenance sweep until a shutdown signal arrives.
pub async fn run_server(config: AppConfig, in_memory: bool) -> Result<()> {
    let ledger: Arc<dyn LedgerStore> = if in_memory {
        warn!("using the in-memory ledger; state is lost on exit");
        Arc::new(MemoryLedger::new())
    } else {
        let ledger = connect_postgres(&config).await?;
        ledger.migrate().await?;
        Arc::new(ledger)
    };
    let identities = Arc::new(HmacIdentityProvider::new(&config.auth.token_secret));
    let state = AppState::new(ledger, identities, &config.marketplace);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let maintenance_handle = match config.maintenance.sweep_interval_secs {
        0 => {
            info!("maintenance sweep disabled");
            None
        }
        secs => Some(tokio::spawn(
            state
                .maintenance()
                .run(Duration::from_secs(secs), shutdown_tx.subscribe()),
        )),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("leadmarket listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(());
    if let Some(handle) = maintenance_handle {
        if let Err(e) = handle.await {
            error!("maintenance task failed: {}", e);
        }
    }
    Ok(())
}
