//! Exchange Ledger service
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Internal API │───▶│   Services   │───▶│    Store     │
//! │   (axum)     │    │ wallet/dep/  │    │ Postgres or  │
//! └──────────────┘    │ withdrawal   │    │   memory     │
//! ┌──────────────┐    └──────────────┘    └──────────────┘
//! │  Background  │───▶ pollers, withdrawal worker,
//! │    tasks     │     reconciliation, proof of reserves
//! └──────────────┘
//! ```
//!
//! Usage: `exchange_ledger [--env dev] [--port 8090] [--memory]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use exchange_ledger::chain::ChainClients;
use exchange_ledger::config::AppConfig;
use exchange_ledger::db::Database;
use exchange_ledger::deposit::DepositPoller;
use exchange_ledger::gateway::{self, AppState, Stores};
use exchange_ledger::logging::init_logging;
use exchange_ledger::money::CurrencyRegistry;
use exchange_ledger::reconciliation::{run_proof_of_reserves, run_reconciliation};
use exchange_ledger::storage::{MemoryStore, PgStore};
use exchange_ledger::withdrawal::{ManualSettlementClient, WithdrawalWorker};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

/// Force the in-memory store even when a database URL is configured
fn use_memory_store() -> bool {
    std::env::args().any(|a| a == "--memory")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}

async fn open_stores(config: &AppConfig) -> anyhow::Result<(Stores, Option<Arc<Database>>)> {
    match &config.postgres_url {
        Some(url) if !use_memory_store() => {
            let db = Database::connect(url, &config.database)
                .await
                .context("failed to connect to PostgreSQL")?;
            db.init_schema().await.context("failed to initialise schema")?;
            info!(
                max_connections = config.database.max_connections,
                "Connected to PostgreSQL"
            );
            let store = Arc::new(PgStore::new(
                db.pool().clone(),
                config.database.lock_timeout_ms,
            ));
            Ok((Stores::from_backend(store), Some(Arc::new(db))))
        }
        _ => {
            warn!("Using in-memory store; all state is lost on exit");
            Ok((Stores::from_backend(Arc::new(MemoryStore::new())), None))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override() {
        config.server.port = port;
    }
    let _log_guard = init_logging(&config);

    info!(env = %env, revision = env!("GIT_REVISION"), "Starting exchange ledger");

    let currencies = Arc::new(CurrencyRegistry::from_config(&config.currencies)?);
    let chains = ChainClients::from_config(&config.chains, &currencies)?;
    let (stores, db) = open_stores(&config).await?;

    if let Some(fee_account) = &config.fee_account {
        stores
            .wallets
            .open_account(fee_account, &currencies.codes())
            .await?;
        info!(account_id = %fee_account, "Fee account ready");
    }

    let state = Arc::new(AppState::new(
        &config,
        currencies,
        stores,
        chains,
        Arc::new(ManualSettlementClient),
        db,
    ));

    // ==========================================================================
    // Background tasks
    // ==========================================================================
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    for poller_config in &config.deposit_pollers {
        let poller = DepositPoller::new(poller_config, state.deposits.clone());
        tasks.push(tokio::spawn(poller.run(shutdown_rx.clone())));
    }

    let worker = WithdrawalWorker::new(&config.withdrawals, state.withdrawals.clone());
    tasks.push(tokio::spawn(worker.run(shutdown_rx.clone())));

    tasks.push(tokio::spawn(run_reconciliation(
        state.reconciliation.clone(),
        Duration::from_secs(config.reconciliation.interval_secs),
        shutdown_rx.clone(),
    )));
    tasks.push(tokio::spawn(run_proof_of_reserves(
        state.proofs.clone(),
        Duration::from_secs(config.proof_of_reserves.interval_secs),
        shutdown_rx,
    )));
    info!(tasks = tasks.len(), "Background tasks started");

    // ==========================================================================
    // Internal API
    // ==========================================================================
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {} (port in use?)", addr))?;
    let app = gateway::router(state, config.request_timeout());
    gateway::serve(listener, app, shutdown_signal()).await?;

    info!("Stopping background tasks");
    if shutdown_tx.send(true).is_err() {
        warn!("All background tasks already stopped");
    }
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task panicked");
        }
    }
    info!("Exchange ledger stopped");
    Ok(())
}
