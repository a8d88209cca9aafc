use super::TokenService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Background task that periodically removes expired tokens.
///
/// The first tick fires immediately, which doubles as the startup sweep.
/// Runs until the task is aborted.
pub async fn run_sweep_loop(service: Arc<TokenService>, interval_minutes: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_minutes * 60));

    loop {
        interval.tick().await;

        // File I/O; keep it off the async workers
        let svc = Arc::clone(&service);
        match tokio::task::spawn_blocking(move || svc.sweep_now()).await {
            Ok(0) => debug!("Token sweep complete, nothing expired"),
            Ok(removed) => info!(removed, "Token sweep complete"),
            Err(e) => error!(error = %e, "Token sweep task failed"),
        }
    }
}
