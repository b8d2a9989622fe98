// SPDX-FileCopyrightText: 2026 Todobot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `todobot serve` command implementation.
//!
//! Wires SQLite storage, the OpenRouter extractor and the Apps Script sink
//! into a [`QueueManager`], then runs the Telegram transport and the health
//! endpoint until SIGINT/SIGTERM. Shutdown stops intake first and then
//! drains the queue.

use std::sync::Arc;

use tracing::{error, info, warn};

use todobot_config::model::TodobotConfig;
use todobot_core::TodobotError;
use todobot_openrouter::OpenRouterExtractor;
use todobot_queue::{QueueManager, QueueSettings};
use todobot_sheets::AppsScriptSink;
use todobot_storage::SqliteStore;
use todobot_telegram::TelegramTransport;

use crate::health;
use crate::shutdown;

pub async fn run_serve(config: TodobotConfig) -> Result<(), TodobotError> {
    init_tracing(&config.service.log_level);
    info!("starting todobot serve");

    let extractor = Arc::new(OpenRouterExtractor::new(&config.openrouter)?);
    let sink = Arc::new(AppsScriptSink::new(&config.sheets)?);
    let store = Arc::new(SqliteStore::new(config.storage.clone()));

    let manager = QueueManager::builder(store, extractor, sink)
        .settings(QueueSettings::from(&config.queue))
        .start()
        .await?;

    let report = manager.recovery_report();
    if report.total() > 0 {
        info!(
            reopened = report.reopened,
            resumed = report.resumed,
            interrupted = report.interrupted,
            finalized = report.finalized,
            dead_letters = report.dead_letters,
            "recovered unfinished batches"
        );
    }

    let cancel = shutdown::install_signal_handler();

    let health_task = {
        let host = config.service.health_host.clone();
        let port = config.service.health_port;
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = health::serve_health(&host, port, manager, cancel.clone()).await {
                error!(error = %e, "health endpoint failed, shutting down");
                cancel.cancel();
            }
        })
    };

    let transport = match config.telegram.bot_token.as_deref() {
        Some(token) if !token.is_empty() => match TelegramTransport::new(&config.telegram) {
            Ok(transport) => Some(transport),
            Err(e) => {
                warn!(error = %e, "Telegram transport disabled");
                None
            }
        },
        _ => {
            info!("telegram.bot_token not set, running without a chat transport");
            None
        }
    };

    match transport {
        Some(transport) => transport.run(manager.clone(), cancel.clone()).await,
        None => cancel.cancelled().await,
    }
    // The transport can stop on its own; make sure everything else follows.
    cancel.cancel();

    let stats = manager.stats();
    info!(
        open_batches = stats.open_batches,
        in_flight = stats.in_flight,
        "draining delivery queue"
    );
    let result = manager.shutdown().await;

    if let Err(e) = health_task.await {
        warn!(error = %e, "health endpoint task panicked");
    }

    result?;
    let stats = manager.stats();
    info!(
        delivered = stats.delivered,
        retried = stats.retried,
        dead_lettered = stats.dead_lettered,
        "todobot shutdown complete"
    );
    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("todobot={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
