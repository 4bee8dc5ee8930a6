//! Arbitrage opportunity detection.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::{Decimal, RoundingStrategy};
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::calculator::{clamp_amount, profit_ratio, qualifies, ArbitrageOpportunity};
use crate::config::Config;
use crate::error::MarketError;
use crate::market::{CounterpartyQuote, DepthProvider, QuoteLevel, Side, TradingPair};
use crate::metrics;
use crate::orderbook::{BookHandle, Depth, TradePrint};

/// Per-pair detector comparing the primary book with counterparty quotes.
pub struct OpportunityDetector {
    config: Arc<Config>,
    pair: TradingPair,
    book: BookHandle,
    quotes: Arc<dyn DepthProvider>,
    queue: mpsc::Sender<ArbitrageOpportunity>,
    threshold: Decimal,
    salt: i64,
    last_fished: Option<OffsetDateTime>,
}

impl OpportunityDetector {
    /// Create a detector for the pair served by `book`.
    pub fn new(
        config: Arc<Config>,
        book: BookHandle,
        quotes: Arc<dyn DepthProvider>,
        queue: mpsc::Sender<ArbitrageOpportunity>,
        salt: i64,
    ) -> Self {
        Self {
            threshold: config.profit_threshold(),
            pair: book.pair(),
            config,
            book,
            quotes,
            queue,
            salt,
            last_fished: None,
        }
    }

    /// Fee-adjusted threshold in use.
    pub fn threshold(&self) -> Decimal {
        self.threshold
    }

    /// Opportunities offered by the top of `depth` against `quote`.
    ///
    /// The best primary bid is sold into and hedged at the counterparty ask;
    /// the best primary ask is bought and hedged at the counterparty bid.
    pub fn evaluate(&self, depth: &Depth, quote: &CounterpartyQuote) -> Vec<ArbitrageOpportunity> {
        let mut found = Vec::with_capacity(2);
        if let Some(bid) = depth.best_bid() {
            found.extend(self.inspect(Side::Ask, bid.price, bid.amount, &quote.ask));
        }
        if let Some(ask) = depth.best_ask() {
            found.extend(self.inspect(Side::Bid, ask.price, ask.amount, &quote.bid));
        }
        found
    }

    /// Price-improved opportunity from a recent trade print, at most once per print.
    ///
    /// A print above the counterparty ask is resold slightly below the print;
    /// a print below the counterparty bid is rebought slightly above it.
    pub fn fish(
        &mut self,
        print: Option<&TradePrint>,
        quote: &CounterpartyQuote,
        now: OffsetDateTime,
    ) -> Option<ArbitrageOpportunity> {
        let print = print?;
        let window = time::Duration::seconds(self.config.fishing_window_secs as i64);
        if print.timestamp + window < now || self.last_fished == Some(print.timestamp) {
            return None;
        }
        self.last_fished = Some(print.timestamp);

        let (category, otc) = if print.price > quote.ask.price {
            (Side::Ask, &quote.ask)
        } else if print.price < quote.bid.price {
            (Side::Bid, &quote.bid)
        } else {
            return None;
        };

        let gap = print.price - otc.price;
        let price = (print.price - gap * self.config.fishing_lower_percent)
            .round_dp_with_strategy(print.price.scale() + 1, RoundingStrategy::ToZero);
        let amount = print.amount * self.config.fishing_amount_ratio;

        debug!(pair = %self.pair, print = %print.price, price = %price, %category, "Fishing trade print");
        let opportunity = self.inspect(category, price, amount, otc)?.fishing();
        metrics::inc_fishing_opportunities();
        Some(opportunity)
    }

    fn inspect(
        &self,
        category: Side,
        price: Decimal,
        amount: Decimal,
        otc: &QuoteLevel,
    ) -> Option<ArbitrageOpportunity> {
        if price <= Decimal::ZERO || otc.price <= Decimal::ZERO {
            return None;
        }
        let profit = profit_ratio(category, price, otc.price)?;
        if !qualifies(profit, self.threshold) {
            return None;
        }
        let Some(amount) = clamp_amount(amount, otc.min_amount, otc.max_amount) else {
            debug!(pair = %self.pair, %amount, min = %otc.min_amount, "Amount outside counterparty limits");
            return None;
        };

        info!(
            pair = %self.pair,
            %category,
            primary_price = %price,
            secondary_price = %otc.price,
            %amount,
            %profit,
            "Arbitrage opportunity detected"
        );
        Some(ArbitrageOpportunity::new(
            self.config.client_id,
            self.salt,
            self.pair,
            category,
            price,
            amount,
            otc,
            profit,
            self.config.order_lifetime(),
        ))
    }

    /// Hand `opportunity` to the executor, dropping it if the queue stays full.
    pub async fn enqueue(&self, opportunity: ArbitrageOpportunity) -> bool {
        let timeout = Duration::from_millis(self.config.enqueue_timeout_ms);
        let id = opportunity.id;
        match self.queue.send_timeout(opportunity, timeout).await {
            Ok(()) => {
                metrics::inc_opportunities_detected();
                true
            }
            Err(e) => {
                metrics::inc_opportunities_dropped();
                warn!(pair = %self.pair, opportunity_id = %id, reason = %e, "Opportunity dropped");
                false
            }
        }
    }

    /// One detection pass. Returns the number of opportunities enqueued.
    #[instrument(skip(self), fields(pair = %self.pair))]
    pub async fn tick(&mut self) -> Result<usize, MarketError> {
        let quote = tokio::time::timeout(self.config.http_timeout(), self.quotes.quote(&self.pair))
            .await
            .map_err(|_| MarketError::Timeout)??;

        let snapshot = self.book.snapshot();
        if snapshot.needs_resync {
            debug!("Book awaiting resync, skipping tick");
            return Ok(0);
        }

        let mut found = self.evaluate(&snapshot.depth, &quote);
        if self.config.fishing_enabled {
            let now = OffsetDateTime::now_utc();
            found.extend(self.fish(snapshot.last_trade.as_ref(), &quote, now));
        }

        let mut enqueued = 0;
        for opportunity in found {
            if self.enqueue(opportunity).await {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    /// Tick until shutdown. A failed tick is logged and the next one proceeds.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(pair = %self.pair, threshold = %self.threshold, "Detector started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        debug!(pair = %self.pair, error = %e, "Detector tick failed");
                    }
                }
            }
        }

        info!(pair = %self.pair, "Detector stopped");
    }
}
