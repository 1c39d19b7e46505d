use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticketflow_core::{
    config_path, create_audit_system, load_config, validate_config, AuditEvent, AuditStore,
    ExclusivityCoordinator, HttpPipelineRunner, Reconciler, ReconciliationScheduler,
    SceneController, SqliteAuditStore, SqliteChecksumReports, SqliteLockTable, SqliteTicketStore,
    TicketFlowManager, TicketStatus, TicketUpdateCallback,
};

use ticketflow_server::api::create_router;
use ticketflow_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = config_path();

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    let pipeline_config = config
        .pipeline
        .clone()
        .context("A [pipeline] section is required to submit flows")?;
    info!("Using HTTP pipeline runner (timeout {}s)", pipeline_config.timeout_secs);
    let runner = Arc::new(
        HttpPipelineRunner::new(pipeline_config).context("Failed to create pipeline runner")?,
    );

    // Compute config hash for audit
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    // Stores share one database file
    let db_path = &config.database.path;
    let audit_store: Arc<dyn AuditStore> =
        Arc::new(SqliteAuditStore::new(db_path).context("Failed to create audit store")?);
    let ticket_store =
        Arc::new(SqliteTicketStore::new(db_path).context("Failed to create ticket store")?);
    let lock_table =
        Arc::new(SqliteLockTable::new(db_path).context("Failed to create lock table")?);
    let checksum_reports = Arc::new(
        SqliteChecksumReports::new(db_path).context("Failed to create checksum report store")?,
    );
    info!("Stores initialized");

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let update_callback: TicketUpdateCallback =
        Arc::new(|ticket_id: &str, status: TicketStatus| {
            info!(ticket_id, status = %status, "Ticket status changed");
        });

    let manager = Arc::new(
        TicketFlowManager::new(
            config.orchestrator.clone(),
            ticket_store,
            Arc::new(ExclusivityCoordinator::new(lock_table)),
            SceneController::new(runner),
            Some(audit_handle.clone()),
        )
        .with_update_callback(update_callback),
    );

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&manager),
        checksum_reports,
        config.scheduler.clone(),
        Some(audit_handle.clone()),
    ));
    let scheduler = Arc::new(ReconciliationScheduler::new(&config.scheduler, reconciler));
    scheduler.start().await;

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&manager),
        Arc::clone(&scheduler),
        audit_handle.clone(),
        audit_store,
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping reconciliation scheduler...");
    scheduler.stop().await;

    info!("Server shutting down...");
    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle clone is gone.
    drop(scheduler);
    drop(manager);
    drop(audit_handle);

    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
