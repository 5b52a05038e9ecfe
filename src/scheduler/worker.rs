use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::domain::TradeStatus;
use crate::store::TradeStore;
use crate::strategy::{Strategy, TickOutcome};

/// Body of one execution slot.
///
/// The inter-tick sleep is the only point where cancellation is observed, so
/// an in-flight exchange call always completes before the slot exits.
pub(super) async fn run_slot(
    mut strategy: Box<dyn Strategy>,
    store: Arc<dyn TradeStore>,
    permits: Arc<Semaphore>,
    tick_interval: Duration,
    mut cancel: watch::Receiver<bool>,
) {
    let trade_id = strategy.trade_id().to_string();

    let _permit = tokio::select! {
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
        _ = cancel.changed() => {
            debug!("Retired while waiting for a worker");
            return;
        }
    };

    match store.get_trade(&trade_id).await {
        Ok(trade) if trade.status == TradeStatus::Pending => {
            if let Err(e) = store
                .transition_trade(&trade_id, TradeStatus::Pending, TradeStatus::Active)
                .await
            {
                warn!("Could not activate trade: {}", e);
                return;
            }
            info!("Trade activated");
        }
        Ok(trade) if trade.status == TradeStatus::Active => {}
        Ok(trade) => {
            debug!("Trade is {}, nothing to run", trade.status);
            return;
        }
        Err(e) => {
            warn!("Could not load trade: {}", e);
            return;
        }
    }

    if let Err(e) = strategy.prepare().await {
        error!("Strategy preparation failed: {}", e);
        return;
    }
    info!(
        "Running {} (remaining {})",
        strategy.name(),
        strategy.remaining_quantity()
    );

    loop {
        match strategy.process_interval(Utc::now()).await {
            Ok(TickOutcome::Continue) => {}
            Ok(TickOutcome::Stop) => {
                info!("Strategy stopped");
                break;
            }
            Err(e) if e.is_not_found() => {
                warn!("Trade disappeared: {}", e);
                break;
            }
            Err(e) => warn!("Tick failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(tick_interval) => {}
            _ = cancel.changed() => {
                if let Err(e) = strategy.wind_down().await {
                    warn!("Wind down failed: {}", e);
                }
                break;
            }
        }
    }
}
