//! Background tasks: reconnecting failed connectors and store upkeep.

use std::sync::Arc;
use std::time::Duration;

use crossbar_bridge::{ConnectorHandle, ReconnectPolicy};
use crossbar_gateway::CorrelationStore;
use tracing::{debug, error, info, warn};

/// Reconnect `handle` until it succeeds, then rejoin every room.
///
/// The caller must have won [`ConnectorHandle::begin_reconnect`] first so
/// only one of these runs per account.
pub async fn reconnect(handle: Arc<ConnectorHandle>, policy: ReconnectPolicy) {
    let mut attempt: u32 = 0;
    loop {
        let delay = policy.delay_for(attempt);
        info!(
            account = %handle.account(),
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        tokio::time::sleep(delay).await;

        match handle.reconnect_attempt(attempt + 1).await {
            Ok(()) => break,
            Err(err) => {
                warn!(account = %handle.account(), attempt = attempt + 1, error = %err, "reconnect failed");
                attempt = attempt.saturating_add(1);
            }
        }
    }

    handle.reset_joined();
    match handle.join_channels().await {
        Ok(joined) => info!(account = %handle.account(), joined, "rejoined channels"),
        Err(err) => error!(account = %handle.account(), error = %err, "rejoin after reconnect failed"),
    }
}

/// Run `maintain` on every store each `interval`, forever.
pub async fn maintain(stores: Vec<(String, Arc<dyn CorrelationStore>)>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        for (gateway, store) in &stores {
            match store.maintain().await {
                Ok(0) => debug!(gateway = %gateway, "correlation store needs no upkeep"),
                Ok(removed) => info!(gateway = %gateway, removed, "trimmed correlation store"),
                Err(err) => warn!(gateway = %gateway, error = %err, "correlation upkeep failed"),
            }
        }
    }
}
