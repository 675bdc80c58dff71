use crate::db;
use tokio::sync::watch;
use tokio::time::Duration;

/// Periodic WAL checkpoint so the log file stays bounded under sustained
/// write load. Runs on its own connection; failures are logged and the next
/// interval tries again.
pub fn spawn_checkpoint_worker(
    db_path: String,
    interval_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let conn = match db::open_worker_connection(&db_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "checkpoint worker failed to open database");
                return;
            }
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.tick().await; // consume the immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);") {
                        tracing::warn!(error = %e, "wal checkpoint failed");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        tracing::info!("checkpoint worker stopped");
    });
}
