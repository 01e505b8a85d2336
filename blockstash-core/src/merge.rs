//! Fan-in of per-operation failure channels
//!
//! Concurrent block operations each report at most one failure on a
//! oneshot channel; a dropped sender means the operation finished cleanly.
//! `merge_error_channels` funnels all of them into one receiver that closes
//! once every source has delivered, closed, or been abandoned on
//! cancellation.

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Merge `channels` into a single receiver of failures
///
/// - One forwarding task per source relays its value, if any, then exits.
/// - The output holds `channels.len()` values, so forwarders never wait on
///   the consumer even when every source fails at once.
/// - Once `cancel` fires, forwarders stop without relaying anything more.
/// - The output closes exactly once, after all forwarders have finished.
///
/// Values arrive in no particular order and are neither reordered nor
/// deduplicated. Must be called from within a tokio runtime.
pub fn merge_error_channels<E>(
    cancel: CancellationToken,
    channels: Vec<oneshot::Receiver<E>>,
) -> mpsc::Receiver<E>
where
    E: Send + 'static,
{
    let (tx, rx) = mpsc::channel(channels.len().max(1));
    let sources = channels.len();

    let forwarders: Vec<_> = channels
        .into_iter()
        .enumerate()
        .map(|(index, source)| {
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        trace!(index, "Forwarder abandoned on cancellation");
                    }
                    received = source => {
                        if let Ok(error) = received {
                            // capacity covers every source, this never waits
                            let _ = tx.send(error).await;
                        }
                    }
                }
            })
        })
        .collect();

    tokio::spawn(async move {
        join_all(forwarders).await;
        drop(tx);
        debug!(sources, "All error forwarders finished, closing merged channel");
    });

    rx
}
