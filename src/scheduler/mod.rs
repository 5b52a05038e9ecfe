//! Trade Scheduler
//!
//! Owns one execution slot per running trade:
//! - `admit` starts a slot unless one is already running for the trade
//! - `retire` cancels a slot at its next suspension point and waits for it;
//!   the slot stays registered until it has exited, and `admit` for the same
//!   trade waits for that exit instead of starting a second slot
//! - `sweep_completed` forgets slots whose strategy finished on its own
//!
//! A semaphore bounds how many slots execute at once. Admitted trades beyond
//! that bound wait for a permit before their first tick.

mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::SchedulerConfig;
use crate::domain::Trade;
use crate::error::Result;
use crate::store::TradeStore;
use crate::strategy::StrategyFactory;

/// Result of an admission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// A new slot was spawned
    Started,
    /// A slot for this trade is already running; nothing changed
    AlreadyRunning,
    /// The trade's strategy failed to build earlier and is not retried
    Quarantined,
}

/// A running execution slot
struct Slot {
    generation: u64,
    cancel: watch::Sender<bool>,
    /// Taken by `retire`; `None` marks a slot that is winding down
    handle: Option<JoinHandle<()>>,
    /// Closed when the slot task ends, panics included
    exited: watch::Receiver<()>,
    started_at: DateTime<Utc>,
}

impl Slot {
    fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    fn is_retiring(&self) -> bool {
        self.handle.is_none()
    }

    fn has_exited(&self) -> bool {
        self.exited.has_changed().is_err()
    }
}

/// Snapshot of one slot for status reporting
#[derive(Debug, Clone)]
pub struct SlotStatus {
    pub trade_id: String,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
}

pub struct TradeScheduler {
    /// Running slots by trade id
    slots: Mutex<HashMap<String, Slot>>,
    /// Trades whose strategy could not be constructed
    quarantined: Mutex<HashSet<String>>,
    permits: Arc<Semaphore>,
    factory: StrategyFactory,
    store: Arc<dyn TradeStore>,
    tick_interval: Duration,
    next_generation: AtomicU64,
}

impl TradeScheduler {
    pub fn new(
        config: &SchedulerConfig,
        factory: StrategyFactory,
        store: Arc<dyn TradeStore>,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            quarantined: Mutex::new(HashSet::new()),
            permits: Arc::new(Semaphore::new(config.max_workers.max(1))),
            factory,
            store,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Start a slot for `trade` if none is running.
    ///
    /// If the trade's previous slot is still winding down, waits for it to
    /// exit first. A strategy construction failure is returned once; later
    /// calls for the same trade report `Quarantined` without trying again.
    pub async fn admit(&self, trade: &Trade) -> Result<AdmitOutcome> {
        let mut slots = loop {
            let slots = self.slots.lock().await;
            let winding_down = match slots.get(&trade.id) {
                Some(slot) if slot.is_running() => return Ok(AdmitOutcome::AlreadyRunning),
                Some(slot) if slot.is_retiring() && !slot.has_exited() => Some(slot.exited.clone()),
                _ => None,
            };
            let Some(mut exited) = winding_down else {
                break slots;
            };
            drop(slots);
            debug!(trade_id = %trade.id, "Waiting for retiring slot to exit");
            // Never sent on; resolves once the sender is dropped
            let _ = exited.changed().await;
        };

        if self.quarantined.lock().await.contains(&trade.id) {
            return Ok(AdmitOutcome::Quarantined);
        }

        let strategy = match self.factory.build(trade) {
            Ok(strategy) => strategy,
            Err(e) => {
                error!(trade_id = %trade.id, "Cannot build strategy, trade left unscheduled: {}", e);
                self.quarantined.lock().await.insert(trade.id.clone());
                return Err(e);
            }
        };

        let (cancel, cancel_rx) = watch::channel(false);
        let (exited_tx, exited) = watch::channel(());
        let span = tracing::info_span!("slot", trade_id = %trade.id);
        let slot_body = worker::run_slot(
            strategy,
            self.store.clone(),
            self.permits.clone(),
            self.tick_interval,
            cancel_rx,
        );
        let handle = tokio::spawn(
            async move {
                let _exited = exited_tx;
                slot_body.await
            }
            .instrument(span),
        );

        slots.insert(
            trade.id.clone(),
            Slot {
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                cancel,
                handle: Some(handle),
                exited,
                started_at: Utc::now(),
            },
        );
        info!(trade_id = %trade.id, "Admitted trade ({} slots)", slots.len());

        Ok(AdmitOutcome::Started)
    }

    /// Cancel the trade's slot, if any, and wait for it to wind down.
    ///
    /// The slot stays registered while it winds down. Returns false when no
    /// slot existed.
    pub async fn retire(&self, trade_id: &str) -> bool {
        let taken = {
            let mut slots = self.slots.lock().await;
            match slots.get_mut(trade_id) {
                None => None,
                Some(slot) => {
                    let _ = slot.cancel.send(true);
                    Some((slot.generation, slot.handle.take(), slot.exited.clone()))
                }
            }
        };
        let Some((generation, handle, mut exited)) = taken else {
            debug!(trade_id, "No slot to retire");
            return false;
        };

        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!(trade_id, "Slot panicked: {}", e);
                    }
                }
            }
            // Another caller is already retiring it
            None => {
                let _ = exited.changed().await;
            }
        }

        let mut slots = self.slots.lock().await;
        if slots
            .get(trade_id)
            .map_or(false, |slot| slot.generation == generation)
        {
            slots.remove(trade_id);
        }
        info!(trade_id, "Retired slot");
        true
    }

    /// Drop bookkeeping for slots that finished on their own
    pub async fn sweep_completed(&self) -> Vec<String> {
        let finished: Vec<(String, Slot)> = {
            let mut slots = self.slots.lock().await;
            // Retiring slots belong to their `retire` call
            let ids: Vec<String> = slots
                .iter()
                .filter(|(_, slot)| slot.handle.as_ref().map_or(false, |h| h.is_finished()))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| slots.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        let mut swept = Vec::with_capacity(finished.len());
        for (id, slot) in finished {
            if let Some(handle) = slot.handle {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!(trade_id = %id, "Slot panicked: {}", e);
                    }
                }
            }
            debug!(trade_id = %id, "Swept finished slot");
            swept.push(id);
        }
        swept
    }

    pub async fn is_running(&self, trade_id: &str) -> bool {
        self.slots
            .lock()
            .await
            .get(trade_id)
            .map_or(false, Slot::is_running)
    }

    pub async fn running_ids(&self) -> Vec<String> {
        self.slots
            .lock()
            .await
            .iter()
            .filter(|(_, slot)| slot.is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn status(&self) -> Vec<SlotStatus> {
        self.slots
            .lock()
            .await
            .iter()
            .map(|(id, slot)| SlotStatus {
                trade_id: id.clone(),
                started_at: slot.started_at,
                finished: !slot.is_running(),
            })
            .collect()
    }

    pub async fn is_quarantined(&self, trade_id: &str) -> bool {
        self.quarantined.lock().await.contains(trade_id)
    }

    /// Retire every slot (shutdown)
    pub async fn retire_all(&self) {
        let ids: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        if ids.is_empty() {
            return;
        }
        info!("Retiring {} slots", ids.len());
        for id in ids {
            if !self.retire(&id).await {
                warn!(trade_id = %id, "Slot vanished during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::PaperExchange;
    use crate::domain::{MarketRule, TradeSide, TradeStatus};
    use crate::markets::MarketRegistry;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    fn scheduler(store: Arc<MemoryStore>) -> TradeScheduler {
        let registry = Arc::new(
            MarketRegistry::new(vec![MarketRule::new(
                100004,
                "BTCUSDC",
                dec!(0.1),
                dec!(0.00001),
            )])
            .unwrap(),
        );
        let factory = StrategyFactory::new(
            Arc::new(PaperExchange::new(registry.clone())),
            store.clone(),
            registry,
        );
        TradeScheduler::new(
            &SchedulerConfig {
                max_workers: 2,
                tick_interval_ms: 10,
            },
            factory,
            store,
        )
    }

    fn trade(symbol: &str) -> Trade {
        Trade::new(
            symbol,
            TradeSide::Buy,
            dec!(1),
            dec!(50000),
            "twap",
            serde_json::json!({"frequency": 60, "total_duration": 1}),
        )
    }

    #[tokio::test]
    async fn test_retire_without_slot_is_noop() {
        let scheduler = scheduler(Arc::new(MemoryStore::new()));
        assert!(!scheduler.retire("missing").await);
        assert!(!scheduler.is_running("missing").await);
    }

    #[tokio::test]
    async fn test_admit_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone());
        let trade = trade("BTCUSDC");
        store.insert_trade(&trade).await.unwrap();

        assert_eq!(scheduler.admit(&trade).await.unwrap(), AdmitOutcome::Started);
        assert_eq!(
            scheduler.admit(&trade).await.unwrap(),
            AdmitOutcome::AlreadyRunning
        );
        assert_eq!(scheduler.running_ids().await, vec![trade.id.clone()]);

        assert!(scheduler.retire(&trade.id).await);
        assert!(!scheduler.is_running(&trade.id).await);
    }

    #[tokio::test]
    async fn test_admit_during_retire_waits_for_exit() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Arc::new(scheduler(store.clone()));
        let trade = trade("BTCUSDC");
        store.insert_trade(&trade).await.unwrap();
        scheduler.admit(&trade).await.unwrap();

        let retiring = {
            let scheduler = scheduler.clone();
            let id = trade.id.clone();
            tokio::spawn(async move { scheduler.retire(&id).await })
        };
        tokio::task::yield_now().await;

        // The old slot is retiring or gone, never reported as running
        assert_eq!(scheduler.admit(&trade).await.unwrap(), AdmitOutcome::Started);
        assert!(retiring.await.unwrap());

        let slots = scheduler.status().await;
        assert_eq!(slots.len(), 1);
        assert!(!slots[0].finished);
        assert!(scheduler.is_running(&trade.id).await);

        scheduler.retire_all().await;
        assert!(scheduler.status().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_market_is_quarantined() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone());
        let trade = trade("DOGEUSDC");
        store.insert_trade(&trade).await.unwrap();

        assert!(scheduler.admit(&trade).await.unwrap_err().is_not_found());
        assert_eq!(
            scheduler.admit(&trade).await.unwrap(),
            AdmitOutcome::Quarantined
        );
        assert!(scheduler.is_quarantined(&trade.id).await);

        // Status untouched
        assert_eq!(
            store.get_trade(&trade.id).await.unwrap().status,
            TradeStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_sweep_removes_finished_slots() {
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler(store.clone());
        let mut trade = trade("BTCUSDC");
        trade.status = TradeStatus::Paused;
        store.insert_trade(&trade).await.unwrap();

        // A paused trade's slot exits right away
        scheduler.admit(&trade).await.unwrap();
        for _ in 0..100 {
            if !scheduler.is_running(&trade.id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(scheduler.sweep_completed().await, vec![trade.id.clone()]);
        assert!(scheduler.status().await.is_empty());
    }
}
