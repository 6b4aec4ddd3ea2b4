//! Perp desk entry point
//!
//! 1. Loads `.env` and the YAML configuration (`CONFIG_PATH`, default `config.yaml`)
//! 2. Registers and connects every enabled exchange
//! 3. Starts the health monitor and one scheduled task per template
//! 4. Runs until Ctrl+C, then stops tasks and disconnects

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use perp_desk::adapters::ConnectionManager;
use perp_desk::config::{self, constants, logging::SanitizedValue};
use perp_desk::core::{ManagerEvent, TaskScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::logging::init_logging();
    info!("Perp desk starting");
    constants::log_configuration();

    let path = config::config_path();
    let app_config = match config::load_config(&path) {
        Ok(cfg) => {
            info!(
                path = %path.display(),
                exchanges = cfg.exchanges.len(),
                tasks = cfg.tasks.len(),
                "[CONFIG] Loaded"
            );
            cfg
        }
        Err(e) => {
            error!(error = %e, "[CONFIG] Configuration failed");
            std::process::exit(1);
        }
    };

    let manager = ConnectionManager::new(app_config.health.clone());
    let mut events = manager.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ManagerEvent::ReconnectFailed { exchange, .. } = &event {
                error!(exchange = %exchange, "Automatic reconnects halted; re-add the exchange to resume");
            }
        }
    });

    for exchange in app_config.enabled_exchanges() {
        let credentials = match exchange.credentials() {
            Ok(c) => c,
            Err(e) => {
                warn!(exchange = %exchange.name, error = %e, "Skipping exchange without credentials");
                continue;
            }
        };
        info!(
            exchange = %exchange.name,
            api_key = %SanitizedValue::new(&credentials.api_key),
            sandbox = credentials.sandbox,
            "Registering exchange"
        );
        if let Err(e) = manager
            .add_exchange_with_settings(
                &exchange.name,
                credentials,
                exchange.settings.clone(),
                exchange.auto_connect,
            )
            .await
        {
            error!(exchange = %exchange.name, error = %e, "Exchange registration failed");
        }
    }
    info!(connected = ?manager.get_connected_exchanges().await, "Exchanges ready");
    manager.start_health_monitor();

    let scheduler = Arc::new(TaskScheduler::new(app_config.scheduler.clone()));
    let cleanup_cancel = CancellationToken::new();
    let cleanup = scheduler.spawn_stale_cleanup(cleanup_cancel.clone());
    for template in &app_config.tasks {
        scheduler.start_task(template.into_task_config(manager.clone()));
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("[SHUTDOWN] Graceful shutdown initiated"),
        Err(err) => error!(error = %err, "Failed to listen for Ctrl+C signal"),
    }

    cleanup_cancel.cancel();
    let _ = cleanup.await;
    let stopped = scheduler.force_clean_all_tasks();
    info!(tasks = stopped, "[SHUTDOWN] Tasks stopped");
    manager.shutdown().await;

    info!("[SHUTDOWN] Clean exit");
    Ok(())
}
