//! Reconciliation loop
//!
//! Runs on its own cadence, separate from the per-trade workers. Each pass:
//! - merges exchange-reported order state into local order rows
//! - closes out local orders the exchange no longer reports
//! - keeps the scheduler's running set equal to the ACTIVE/PENDING trades
//!
//! The loop writes order rows only. Trade status belongs to the workers and
//! the lifecycle commands.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::ReconciliationConfig;
use crate::domain::{timestamp_nanos, ExchangeOrder, Order, OrderStatus};
use crate::error::Result;
use crate::exchange::ExchangeGateway;
use crate::scheduler::{AdmitOutcome, TradeScheduler};
use crate::store::TradeStore;

pub const STALE_REASON: &str = "stale: absent from exchange order history";
pub const UNACKNOWLEDGED_REASON: &str = "submission not acknowledged by exchange";

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub orders_checked: usize,
    pub orders_updated: usize,
    pub orders_missing: usize,
    pub orders_stale: usize,
    pub orders_rejected: usize,
    pub slots_swept: usize,
    pub trades_retired: usize,
    pub trades_admitted: usize,
    pub admit_failures: usize,
    /// The order phase aborted; supervision still ran
    pub order_sync_failed: bool,
}

impl ReconciliationReport {
    fn is_quiet(&self) -> bool {
        self.orders_updated == 0
            && self.orders_stale == 0
            && self.orders_rejected == 0
            && self.trades_retired == 0
            && self.trades_admitted == 0
            && self.admit_failures == 0
            && !self.order_sync_failed
    }
}

pub struct ReconciliationLoop {
    gateway: Arc<dyn ExchangeGateway>,
    store: Arc<dyn TradeStore>,
    scheduler: Arc<TradeScheduler>,
    config: ReconciliationConfig,
    /// Consecutive passes each live order was absent from the exchange
    misses: Mutex<HashMap<u64, u32>>,
}

impl ReconciliationLoop {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        store: Arc<dyn TradeStore>,
        scheduler: Arc<TradeScheduler>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            scheduler,
            config,
            misses: Mutex::new(HashMap::new()),
        }
    }

    /// Run passes until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting reconciliation loop (interval: {}ms, missing threshold: {})",
            self.config.interval_ms, self.config.missing_threshold
        );

        let mut interval = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match self.reconcile_once().await {
                Ok(report) if report.is_quiet() => debug!(?report, "Reconciliation pass"),
                Ok(report) => info!(?report, "Reconciliation pass"),
                Err(e) => error!("Reconciliation pass failed: {}", e),
            }
        }

        info!("Reconciliation loop stopped");
    }

    /// One full pass: orders first, then trade supervision.
    ///
    /// An exchange outage only skips the order phase; trades are still
    /// admitted and retired.
    pub async fn reconcile_once(&self) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        if let Err(e) = self.reconcile_orders(&mut report).await {
            warn!("Order reconciliation failed, supervising trades anyway: {}", e);
            report.order_sync_failed = true;
        }
        self.supervise_trades(&mut report).await?;
        Ok(report)
    }

    async fn reconcile_orders(&self, report: &mut ReconciliationReport) -> Result<()> {
        let live = self.store.get_live_orders().await?;
        let pending = self.store.get_pending_orders().await?;
        if live.is_empty() && pending.is_empty() {
            self.misses.lock().await.clear();
            return Ok(());
        }

        let remote: HashMap<u64, ExchangeOrder> = self
            .gateway
            .get_latest_orders(self.config.latest_orders_limit)
            .await?
            .into_iter()
            .map(|o| (o.client_order_id, o))
            .collect();

        let now_ns = timestamp_nanos(Utc::now());
        let pending_timeout_ns =
            i64::try_from(self.config.pending_timeout_secs.saturating_mul(1_000_000_000))
                .unwrap_or(i64::MAX);

        let mut misses = self.misses.lock().await;
        let live_ids: HashSet<u64> = live.iter().map(|o| o.client_order_id).collect();
        misses.retain(|id, _| live_ids.contains(id));

        for mut order in live.into_iter().chain(pending) {
            report.orders_checked += 1;

            if let Some(exchange_order) = remote.get(&order.client_order_id) {
                misses.remove(&order.client_order_id);
                if order.merge_exchange_state(exchange_order) {
                    debug!(
                        client_order_id = order.client_order_id,
                        "Order now {}", order.status
                    );
                    self.write(&order).await?;
                    report.orders_updated += 1;
                }
                continue;
            }

            report.orders_missing += 1;
            if order.status.is_live() {
                let count = misses.entry(order.client_order_id).or_insert(0);
                *count += 1;
                if *count >= self.config.missing_threshold {
                    warn!(
                        client_order_id = order.client_order_id,
                        trade_id = %order.trade_id,
                        "Order absent for {} passes, closing it out", count
                    );
                    misses.remove(&order.client_order_id);
                    Self::close_out(&mut order, OrderStatus::Cancelled, STALE_REASON, now_ns);
                    self.write(&order).await?;
                    report.orders_stale += 1;
                }
            } else if now_ns.saturating_sub(order.created_at) > pending_timeout_ns {
                warn!(
                    client_order_id = order.client_order_id,
                    trade_id = %order.trade_id,
                    "Pending order never acknowledged, rejecting it"
                );
                Self::close_out(&mut order, OrderStatus::Rejected, UNACKNOWLEDGED_REASON, now_ns);
                self.write(&order).await?;
                report.orders_rejected += 1;
            }
        }

        Ok(())
    }

    fn close_out(order: &mut Order, status: OrderStatus, reason: &str, now_ns: i64) {
        order.status = status;
        order.modified_at = Some(now_ns);
        if status == OrderStatus::Cancelled {
            order.canceled_at = Some(now_ns);
        }
        order.reason = Some(reason.to_string());
    }

    async fn write(&self, order: &Order) -> Result<()> {
        match self.store.update_order(order).await {
            Err(e) if e.is_not_found() => {
                warn!(
                    client_order_id = order.client_order_id,
                    "Order row vanished during reconciliation"
                );
                Ok(())
            }
            other => other,
        }
    }

    async fn supervise_trades(&self, report: &mut ReconciliationReport) -> Result<()> {
        report.slots_swept = self.scheduler.sweep_completed().await.len();

        let trades = self.store.get_active_trades().await?;
        let wanted: HashSet<&str> = trades.iter().map(|t| t.id.as_str()).collect();

        for trade_id in self.scheduler.running_ids().await {
            if !wanted.contains(trade_id.as_str()) && self.scheduler.retire(&trade_id).await {
                info!(trade_id = %trade_id, "Retired slot for inactive trade");
                report.trades_retired += 1;
            }
        }

        for trade in &trades {
            match self.scheduler.admit(trade).await {
                Ok(AdmitOutcome::Started) => report.trades_admitted += 1,
                Ok(AdmitOutcome::AlreadyRunning) | Ok(AdmitOutcome::Quarantined) => {}
                Err(e) => {
                    warn!(trade_id = %trade.id, "Admission failed: {}", e);
                    report.admit_failures += 1;
                }
            }
        }

        Ok(())
    }
}
