//! Periodic reconciliation and proof-of-reserves tasks

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use super::engine::ReconciliationEngine;
use crate::error::LedgerError;
use crate::proof::ProofOfReservesBuilder;

/// Run `job` every `interval` until shutdown; the first run waits one interval.
async fn run_periodic<F, Fut, T>(
    name: &'static str,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    info!(task = name, interval_secs = interval.as_secs(), "Starting periodic task");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = job().await {
            error!(task = name, error = %e, "Periodic task failed");
        }
    }
    info!(task = name, "Periodic task stopped");
}

pub async fn run_reconciliation(
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    run_periodic("reconciliation", interval, shutdown, || engine.run()).await
}

pub async fn run_proof_of_reserves(
    builder: Arc<ProofOfReservesBuilder>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) {
    run_periodic("proof_of_reserves", interval, shutdown, || builder.run()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_periodic_task_runs_and_stops() {
        let counter = AtomicUsize::new(0);
        let runs = &counter;
        let (tx, rx) = watch::channel(false);
        let task = run_periodic("test", Duration::from_millis(5), rx, move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, LedgerError>(())
        });
        let stopper = async {
            while runs.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx.send(true).unwrap();
        };
        tokio::time::timeout(Duration::from_secs(2), async { tokio::join!(task, stopper) })
            .await
            .unwrap();
        assert!(runs.load(Ordering::SeqCst) >= 3);
    }
}
