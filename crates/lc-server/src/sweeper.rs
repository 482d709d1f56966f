//! Periodic removal of expired uploads.

use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Sweep the upload directory every `media.sweep_interval_secs` until
/// cancelled. The first sweep happens one interval after startup; the
/// startup sweep itself is done by the caller.
pub async fn run_sweeper(ctx: AppContext, cancel: CancellationToken) {
    let interval = ctx.config.media.sweep_interval();
    if interval.is_zero() {
        tracing::info!("Periodic upload sweep disabled");
        return;
    }
    let retention = ctx.config.media.retention();

    tracing::info!(
        interval_secs = interval.as_secs(),
        retention_hours = ctx.config.media.retention_hours,
        "Upload sweeper started"
    );

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Upload sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                match ctx.media.sweep(retention).await {
                    Ok(removed) if !removed.is_empty() => {
                        tracing::info!(removed = removed.len(), "Periodic sweep removed expired uploads");
                    }
                    Ok(_) => tracing::debug!("Periodic sweep found nothing to remove"),
                    Err(e) => tracing::warn!("Periodic sweep failed: {e}"),
                }
            }
        }
    }
}
