//! Arbitrage trade execution logic.
//!
//! Three loops share one [`TradingState`](crate::trading::TradingState):
//! intake places primary orders, the sweep offsets filled or expired ones on
//! the secondary venue, and the batch pass offsets accumulated failures.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::calculator::{limit_amount, ArbitrageOpportunity, OpportunityStatus};
use crate::audit::{AuditEvent, AuditSink};
use crate::config::Config;
use crate::error::TradingError;
use crate::market::{DepthProvider, QuoteLevel, Side, TradingPair};
use crate::metrics;
use crate::trading::{
    batch_trace_id, secondary_trace_id, BalanceCache, CancelSchedule, CancelTimer, PrimaryOrder,
    SharedTradingState, VenueGateway,
};

/// Cancel attempts per order during shutdown.
pub const SHUTDOWN_CANCEL_ATTEMPTS: u32 = 3;

/// Result of handing one opportunity to intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Primary order sent and tracked.
    Placed,
    /// Trace id already registered; nothing sent.
    Duplicate,
    /// No balance left to fund the order.
    Unfunded,
    /// Primary venue disabled; registered as observed without sending.
    Simulated,
}

/// Counts of the shared state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Opportunities with a live primary order.
    pub tracked: usize,
    /// Failed records awaiting a batch.
    pub failed: usize,
    /// Primary orders not yet known to be settled.
    pub unobserved: usize,
}

/// Places, sweeps and batches hedge orders.
pub struct TradeExecutor {
    config: Arc<Config>,
    state: SharedTradingState,
    gateway: Arc<VenueGateway>,
    balances: BalanceCache,
    quotes: Arc<dyn DepthProvider>,
    audit: Arc<dyn AuditSink>,
    timer: CancelTimer,
}

impl TradeExecutor {
    /// Create an executor and the cancel schedule its sweep loop owns.
    pub fn new(
        config: Arc<Config>,
        state: SharedTradingState,
        gateway: Arc<VenueGateway>,
        balances: BalanceCache,
        quotes: Arc<dyn DepthProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> (Self, CancelSchedule) {
        let (timer, schedule) = CancelSchedule::channel();
        let executor = Self {
            config,
            state,
            gateway,
            balances,
            quotes,
            audit,
            timer,
        };
        (executor, schedule)
    }

    /// Current state counts.
    pub fn stats(&self) -> ExecutorStats {
        let state = self.state.lock();
        ExecutorStats {
            tracked: state.tracked.len(),
            failed: state.failed.len(),
            unobserved: state.registry.values().filter(|entry| entry.observed_at.is_none()).count(),
        }
    }

    /// Place the primary order for `opportunity` unless its trace id was seen before.
    #[instrument(skip(self, opportunity), fields(pair = %opportunity.pair, opportunity_id = %opportunity.id))]
    pub async fn intake(&self, opportunity: ArbitrageOpportunity) -> Result<IntakeOutcome, TradingError> {
        let trace = opportunity.primary_trace;
        if self.state.lock().is_registered(&trace) {
            debug!(trace_id = %trace, "Opportunity already handled");
            return Ok(IntakeOutcome::Duplicate);
        }

        let pair = opportunity.pair;
        let (asset, wanted) = match opportunity.category {
            Side::Ask => (pair.base, opportunity.amount),
            Side::Bid => (
                pair.quote,
                opportunity.amount * opportunity.price * (Decimal::ONE + self.config.bid_funds_markup),
            ),
        };
        let available = self.balances.get(&asset);
        let order = PrimaryOrder::limit(
            pair,
            opportunity.category,
            opportunity.price,
            wanted.min(available),
            trace,
        );
        if order.amount <= Decimal::ZERO {
            let shortfall = TradingError::InsufficientBalance {
                asset,
                required: wanted,
                available,
            };
            warn!(trace_id = %trace, error = %shortfall, "Skipping opportunity");
            return Ok(IntakeOutcome::Unfunded);
        }

        if !self.config.enable_primary {
            self.state.lock().register(trace, true);
            info!(trace_id = %trace, amount = %order.amount, "Primary venue disabled, order not sent");
            return Ok(IntakeOutcome::Simulated);
        }

        self.state.lock().register(trace, false);
        let placed = match order.validate(
            self.config.asset_precision(&pair.quote),
            self.config.quote_minimums.get_or(&pair.quote, Decimal::ZERO),
        ) {
            Ok(()) => self.gateway.place_primary(&order).await,
            Err(e) => Err(e),
        };
        if let Err(e) = placed {
            self.state.lock().unregister(&trace);
            return Err(e);
        }

        self.timer
            .schedule(Instant::now() + self.config.order_lifetime(), trace);
        self.audit.record(AuditEvent::Created, &opportunity);
        self.state.lock().track(opportunity);
        Ok(IntakeOutcome::Placed)
    }

    /// Fire due cancel timers, then settle every filled, hedged or expired record.
    /// Returns the number of records that left `Pending`.
    pub async fn sweep_once(&self, schedule: &mut CancelSchedule, now: Instant) -> usize {
        let mut cancelled = HashSet::new();
        for trace in schedule.pop_due(now) {
            if self.state.lock().is_observed(&trace) {
                continue;
            }
            match self.gateway.cancel_primary(trace).await {
                Ok(_) => {
                    cancelled.insert(trace);
                }
                Err(e) => warn!(trace_id = %trace, error = %e, "Scheduled cancel failed"),
            }
        }

        let grace = self.config.expiry_grace();
        let primary_fee = self.config.primary_fee;
        let due: Vec<Uuid> = self
            .state
            .lock()
            .tracked
            .values()
            .filter(|o| o.status == OpportunityStatus::Pending)
            .filter(|o| o.has_offset() || o.primary_filled(primary_fee) || o.is_expired(now, grace))
            .map(|o| o.id)
            .collect();

        let mut settled = 0;
        for id in due {
            if self.settle(id, now, &cancelled).await {
                settled += 1;
            }
        }

        let pruned = self
            .state
            .lock()
            .prune_registry(now, self.config.registry_retention());
        if pruned > 0 {
            debug!(pruned, "Registry entries pruned");
        }
        settled
    }

    /// Try to move one record out of `Pending`. `cancelled` holds traces cancelled earlier in this sweep.
    async fn settle(&self, id: Uuid, now: Instant, cancelled: &HashSet<Uuid>) -> bool {
        let Some(record) = self.state.lock().tracked.get(&id).cloned() else {
            return false;
        };

        if let Some(trace) = record.awaiting_reply() {
            if !record.reply_overdue(now, self.config.offset_reply_timeout()) {
                return false;
            }
            error!(
                pair = %record.pair,
                opportunity_id = %record.id,
                trace_id = %trace,
                residual = %record.residual(),
                "Offset reply never arrived"
            );
            self.finish(id, OpportunityStatus::Failed, now);
            return true;
        }

        let expired = record.is_expired(now, self.config.expiry_grace());
        let trace = record.primary_trace;
        if expired && !cancelled.contains(&trace) && !self.state.lock().is_observed(&trace) {
            if let Err(e) = self.gateway.cancel_primary(record.primary_trace).await {
                warn!(
                    pair = %record.pair,
                    opportunity_id = %record.id,
                    trace_id = %record.primary_trace,
                    error = %e,
                    "Cancel at expiry failed"
                );
            }
        }

        // Late confirmations may have landed while cancelling.
        let Some(record) = self.state.lock().tracked.get(&id).cloned() else {
            return false;
        };

        let status = if record.residual() <= Decimal::ZERO {
            // Before any offset, a negative counter leg is an unrefunded order.
            if record.has_offset() || record.counter_amount() >= Decimal::ZERO {
                OpportunityStatus::Success
            } else if !expired {
                return false;
            } else {
                OpportunityStatus::Failed
            }
        } else {
            match self.offset(&record, now).await {
                Ok(true) => return false,
                Ok(false) if !expired => return false,
                Ok(false) => OpportunityStatus::Failed,
                Err(e) if e.is_retryable() || !expired => {
                    warn!(
                        pair = %record.pair,
                        opportunity_id = %record.id,
                        trace_id = %record.primary_trace,
                        error = %e,
                        "Offset failed, retrying next sweep"
                    );
                    return false;
                }
                Err(e) => {
                    error!(
                        pair = %record.pair,
                        opportunity_id = %record.id,
                        trace_id = %record.primary_trace,
                        error = %e,
                        "Offset rejected"
                    );
                    OpportunityStatus::Failed
                }
            }
        };

        self.finish(id, status, now);
        true
    }

    /// Send an offset for the record's residual and wait for its reply.
    /// `Ok(false)` when the residual is below the counterparty minimum or unfunded.
    async fn offset(&self, record: &ArbitrageOpportunity, now: Instant) -> Result<bool, TradingError> {
        let side = record.hedge_side();
        let limits = QuoteLevel {
            price: record.price,
            min_amount: record.min_amount,
            max_amount: record.max_amount,
        };
        let (give, _) = record.pair.give_get(side);
        let amount = self.gateway.floor_amount(
            &give,
            offset_size(&record.pair, side, record.residual(), &limits, &self.balances),
        );
        if amount <= Decimal::ZERO {
            return Ok(false);
        }

        // Debit first so the reply cannot race the bookkeeping.
        let trace = secondary_trace_id(record.id, self.config.secondary_routing_id, record.offset_traces.len());
        if let Some(tracked) = self.state.lock().tracked.get_mut(&record.id) {
            tracked.debit_offset(trace, amount);
            tracked.await_reply(trace, now);
        }

        match self.gateway.offset_secondary(&record.pair, side, amount, trace).await {
            Ok(_) => {
                info!(
                    pair = %record.pair,
                    opportunity_id = %record.id,
                    trace_id = %trace,
                    %side,
                    %amount,
                    remaining = %(record.residual() - amount),
                    "Offset sent, awaiting reply"
                );
                Ok(true)
            }
            Err(e) => {
                if let Some(tracked) = self.state.lock().tracked.get_mut(&record.id) {
                    tracked.credit_offset(&trace, amount);
                }
                Err(e)
            }
        }
    }

    fn finish(&self, id: Uuid, status: OpportunityStatus, now: Instant) {
        let mut state = self.state.lock();
        let Some(record) = state.tracked.get_mut(&id) else {
            return;
        };
        record.transition(status, now);
        let trace = record.primary_trace;
        state.mark_observed(&trace);

        match status {
            OpportunityStatus::Failed => {
                if let Some(record) = state.fail(&id) {
                    metrics::inc_opportunities_failed();
                    warn!(
                        pair = %record.pair,
                        opportunity_id = %record.id,
                        trace_id = %record.primary_trace,
                        base_amount = %record.base_amount,
                        quote_amount = %record.quote_amount,
                        "Opportunity failed, queued for batch"
                    );
                    self.audit.record(AuditEvent::Settled, record);
                }
            }
            _ => {
                if let Some(record) = state.tracked.remove(&id) {
                    metrics::inc_opportunities_succeeded();
                    info!(
                        pair = %record.pair,
                        opportunity_id = %record.id,
                        trace_id = %record.primary_trace,
                        secondary_trace = ?record.secondary_trace,
                        "Opportunity settled"
                    );
                    self.audit.record(AuditEvent::Settled, &record);
                }
            }
        }
    }

    /// Drop failed records older than the batch window, then offset the
    /// aggregate residual of each pair and category in one trade. Returns the
    /// number of batches sent.
    pub async fn batch_once(&self, now: Instant) -> usize {
        let window = Duration::from_secs(self.config.batch_window_secs);
        let mut groups: BTreeMap<(TradingPair, Side), (Vec<Uuid>, Decimal)> = BTreeMap::new();
        {
            let mut state = self.state.lock();
            let aged: Vec<Uuid> = state
                .failed
                .values()
                .filter(|o| o.settled_at().map_or(true, |at| at + window <= now))
                .map(|o| o.id)
                .collect();
            for id in aged {
                if let Some(record) = state.failed.remove(&id) {
                    warn!(
                        pair = %record.pair,
                        opportunity_id = %record.id,
                        trace_id = %record.primary_trace,
                        category = %record.category,
                        price = %record.price,
                        base_amount = %record.base_amount,
                        quote_amount = %record.quote_amount,
                        "Failed opportunity left the batch window, offset manually"
                    );
                    self.audit.record(AuditEvent::Expired, &record);
                }
            }

            for record in state
                .failed
                .values()
                .filter(|o| o.status == OpportunityStatus::Failed && o.residual() > Decimal::ZERO)
            {
                let group = groups
                    .entry((record.pair, record.category))
                    .or_insert_with(|| (Vec::new(), Decimal::ZERO));
                group.0.push(record.id);
                group.1 += record.residual();
            }
        }

        let mut batches = 0;
        for ((pair, category), (ids, residual)) in groups {
            if self.batch_pair(&pair, category, ids, residual, now).await {
                batches += 1;
            }
        }
        batches
    }

    async fn batch_pair(
        &self,
        pair: &TradingPair,
        category: Side,
        mut ids: Vec<Uuid>,
        residual: Decimal,
        now: Instant,
    ) -> bool {
        let counterparty = match tokio::time::timeout(self.config.http_timeout(), self.quotes.quote(pair)).await {
            Ok(Ok(q)) => q,
            Ok(Err(e)) => {
                warn!(pair = %pair, error = %e, "Batch quote failed");
                return false;
            }
            Err(_) => {
                warn!(pair = %pair, "Batch quote timed out");
                return false;
            }
        };

        let side = category.opposite();
        let limits = match side {
            Side::Ask => &counterparty.bid,
            Side::Bid => &counterparty.ask,
        };
        let (give, _) = pair.give_get(side);
        let amount = self
            .gateway
            .floor_amount(&give, offset_size(pair, side, residual, limits, &self.balances));
        if amount <= Decimal::ZERO {
            debug!(pair = %pair, %category, %residual, "Batch residual below counterparty minimum");
            return false;
        }

        ids.sort();
        let trace = batch_trace_id(&ids, amount);
        if let Err(e) = self.gateway.offset_secondary(pair, side, amount, trace).await {
            warn!(pair = %pair, trace_id = %trace, records = ids.len(), error = %e, "Batch offset failed");
            return false;
        }

        // Spread the sent amount over the records; a partly covered record stays failed.
        let mut state = self.state.lock();
        let mut remaining = amount;
        let mut done = 0;
        for id in &ids {
            let Some(record) = state.failed.get_mut(id) else {
                continue;
            };
            let take = record.residual().min(remaining);
            if take > Decimal::ZERO {
                record.debit_offset(trace, take);
                remaining -= take;
            }
            if record.residual() > Decimal::ZERO {
                continue;
            }
            if let Some(mut record) = state.failed.remove(id) {
                record.transition(OpportunityStatus::Done, now);
                self.audit.record(AuditEvent::Settled, &record);
                done += 1;
            }
        }
        metrics::inc_batches_done();
        info!(
            pair = %pair,
            trace_id = %trace,
            records = ids.len(),
            done,
            %side,
            %amount,
            "Batch offset done"
        );
        true
    }

    /// Cancel every order still awaiting settlement and dump tracked records.
    /// Returns the number of cancels that went out.
    pub async fn shutdown(&self) -> usize {
        let pending = self.state.lock().unobserved();
        let mut cancelled = 0;
        for trace in pending {
            for attempt in 1..=SHUTDOWN_CANCEL_ATTEMPTS {
                match self.gateway.cancel_primary(trace).await {
                    Ok(_) => {
                        self.state.lock().mark_observed(&trace);
                        cancelled += 1;
                        break;
                    }
                    Err(e) => warn!(trace_id = %trace, attempt, error = %e, "Shutdown cancel failed"),
                }
            }
        }

        let state = self.state.lock();
        for record in state.tracked.values().chain(state.failed.values()) {
            self.audit.record(AuditEvent::Shutdown, record);
        }
        info!(
            cancelled,
            tracked = state.tracked.len(),
            failed = state.failed.len(),
            "Executor shut down"
        );
        cancelled
    }

    /// Consume opportunities until the queue closes or shutdown.
    pub async fn run_intake(
        self: Arc<Self>,
        mut queue: mpsc::Receiver<ArbitrageOpportunity>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Intake started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = queue.recv() => {
                    let Some(opportunity) = next else { break };
                    let (pair, id, trace) = (opportunity.pair, opportunity.id, opportunity.primary_trace);
                    if let Err(e) = self.intake(opportunity).await {
                        warn!(
                            pair = %pair,
                            opportunity_id = %id,
                            trace_id = %trace,
                            retryable = e.is_retryable(),
                            error = %e,
                            "Intake failed"
                        );
                    }
                }
            }
        }
        info!("Intake stopped");
    }

    /// Sweep every `sweep_interval_ms` until shutdown.
    pub async fn run_sweep(self: Arc<Self>, mut schedule: CancelSchedule, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(self.config.sweep_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Sweep started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let settled = self.sweep_once(&mut schedule, Instant::now()).await;
                    if settled > 0 {
                        debug!(settled, "Sweep settled records");
                    }
                }
            }
        }
        info!("Sweep stopped");
    }

    /// Batch every `batch_interval_secs` until shutdown.
    pub async fn run_batch(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.batch_interval_secs);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "Batch reconciliation started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.batch_once(Instant::now()).await;
                }
            }
        }
        info!("Batch reconciliation stopped");
    }
}

/// Size of the `side` trade that offsets `residual` of its give asset,
/// bounded by `limits` (base units) and the balance on hand.
fn offset_size(
    pair: &TradingPair,
    side: Side,
    residual: Decimal,
    limits: &QuoteLevel,
    balances: &BalanceCache,
) -> Decimal {
    if residual <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    match side {
        Side::Ask => limit_amount(residual, balances.get(&pair.base), limits.min_amount, limits.max_amount),
        Side::Bid => limit_amount(
            residual,
            balances.get(&pair.quote),
            limits.min_amount * limits.price,
            limits.max_amount * limits.price,
        ),
    }
}
