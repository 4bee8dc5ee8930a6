//! The engine boundary: start a pair, stop, and push book events or
//! settlement confirmations in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::arbitrage::{ArbitrageOpportunity, OpportunityDetector, TradeExecutor};
use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::market::{DepthProvider, HttpQuoteClient, TradingPair};
use crate::orderbook::{spawn_book_writer, BookEvent, BookFeed, BookHandle};
use crate::settlement::{
    ConfirmationPoller, HttpSettlementClient, Reconciliation, SettlementClient, SettlementConfirmation,
    SettlementReconciler,
};
use crate::trading::{BalanceCache, BalanceSource, CancelSchedule, SharedTradingState, TradingState, VenueGateway};

/// Loops started on the first `start`.
struct Pending {
    queue: mpsc::Receiver<ArbitrageOpportunity>,
    schedule: CancelSchedule,
}

/// Cross-venue arbitrage engine.
pub struct Engine {
    config: Arc<Config>,
    settlement: Arc<dyn SettlementClient>,
    balance_source: Arc<dyn BalanceSource>,
    quotes: Arc<dyn DepthProvider>,
    state: SharedTradingState,
    balances: BalanceCache,
    executor: Arc<TradeExecutor>,
    reconciler: Arc<SettlementReconciler>,
    queue: mpsc::Sender<ArbitrageOpportunity>,
    pending: Mutex<Option<Pending>>,
    books: Mutex<HashMap<TradingPair, BookHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    salt: i64,
    book_feed: bool,
}

impl Engine {
    /// Build an engine over the given collaborators.
    pub fn new(
        config: Config,
        settlement: Arc<dyn SettlementClient>,
        balance_source: Arc<dyn BalanceSource>,
        quotes: Arc<dyn DepthProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let config = Arc::new(config);
        let state = TradingState::shared();
        let balances = BalanceCache::new();
        let gateway = Arc::new(VenueGateway::new(&config, settlement.clone()));
        let (executor, schedule) = TradeExecutor::new(
            config.clone(),
            state.clone(),
            gateway,
            balances.clone(),
            quotes.clone(),
            audit,
        );
        let reconciler = Arc::new(SettlementReconciler::new(&config, state.clone()));
        let (queue, queue_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown, _) = watch::channel(false);

        Self {
            salt: OffsetDateTime::now_utc().unix_timestamp(),
            config,
            settlement,
            balance_source,
            quotes,
            state,
            balances,
            executor: Arc::new(executor),
            reconciler,
            queue,
            pending: Mutex::new(Some(Pending {
                queue: queue_rx,
                schedule,
            })),
            books: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown,
            book_feed: false,
        }
    }

    /// Build an engine backed by the HTTP settlement and quote clients, with
    /// a websocket feed per started pair.
    pub fn connect(config: Config) -> Result<Self> {
        let settlement = Arc::new(HttpSettlementClient::new(&config)?);
        let quotes = Arc::new(HttpQuoteClient::new(&config)?);
        let engine = Self::new(
            config,
            settlement.clone(),
            settlement,
            quotes,
            Arc::new(TracingAuditSink),
        );
        Ok(engine.with_book_feed(true))
    }

    /// Subscribe each started pair to the websocket feed.
    pub fn with_book_feed(mut self, enabled: bool) -> Self {
        self.book_feed = enabled;
        self
    }

    /// Shared trading state.
    pub fn state(&self) -> SharedTradingState {
        self.state.clone()
    }

    /// Cached balances.
    pub fn balances(&self) -> &BalanceCache {
        &self.balances
    }

    /// The trade executor.
    pub fn executor(&self) -> &Arc<TradeExecutor> {
        &self.executor
    }

    /// Book handle of a started pair.
    pub fn book_handle(&self, pair: &TradingPair) -> Option<BookHandle> {
        self.books.lock().get(pair).cloned()
    }

    /// Start the book and detector for `pair`. Starting a pair twice is a no-op.
    ///
    /// The first call also starts the intake, sweep, batch, balance and
    /// confirmation loops. Must be called from within a tokio runtime.
    pub fn start(&self, pair: TradingPair) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(EngineError::Lifecycle("engine stopped".to_string()));
        }

        let mut books = self.books.lock();
        if books.contains_key(&pair) {
            return Ok(());
        }

        if let Some(pending) = self.pending.lock().take() {
            self.spawn_loops(pending);
        }

        let (book, writer) = spawn_book_writer(pair, self.config.depth_limit, self.shutdown.subscribe());
        let detector = OpportunityDetector::new(
            self.config.clone(),
            book.clone(),
            self.quotes.clone(),
            self.queue.clone(),
            self.salt,
        );

        let mut tasks = self.tasks.lock();
        tasks.push(writer);
        tasks.push(tokio::spawn(detector.run(self.shutdown.subscribe())));
        if self.book_feed {
            let feed = BookFeed::new(self.config.book_ws_url.clone(), book.clone());
            tasks.push(tokio::spawn(feed.run(self.shutdown.subscribe())));
        }
        books.insert(pair, book);

        info!(pair = %pair, feed = self.book_feed, "Pair started");
        Ok(())
    }

    fn spawn_loops(&self, pending: Pending) {
        let poller = ConfirmationPoller::new(
            self.settlement.clone(),
            self.reconciler.clone(),
            self.config.confirmation_page_limit,
            self.config.http_timeout(),
        );

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(
            self.executor.clone().run_intake(pending.queue, self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(
            self.executor.clone().run_sweep(pending.schedule, self.shutdown.subscribe()),
        ));
        tasks.push(tokio::spawn(self.executor.clone().run_batch(self.shutdown.subscribe())));
        tasks.push(tokio::spawn(self.balances.clone().run(
            self.balance_source.clone(),
            Duration::from_secs(self.config.balance_refresh_secs),
            self.shutdown.subscribe(),
        )));
        tasks.push(tokio::spawn(poller.run(
            Duration::from_millis(self.config.confirmation_poll_ms),
            self.shutdown.subscribe(),
        )));
    }

    /// Apply a book event to the book of its market.
    pub async fn on_book_event(&self, event: BookEvent) -> Result<()> {
        let book = self
            .books
            .lock()
            .values()
            .find(|b| b.pair().market_id() == event.market)
            .cloned()
            .ok_or_else(|| EngineError::Lifecycle(format!("no started pair for market {}", event.market)))?;
        book.apply(event).await?;
        Ok(())
    }

    /// Reconcile a pushed settlement confirmation.
    pub fn on_settlement_confirmation(&self, confirmation: &SettlementConfirmation) -> Result<Reconciliation> {
        Ok(self.reconciler.on_confirmation(confirmation)?)
    }

    /// Stop every loop, then cancel unsettled primary orders and dump tracked
    /// records. Returns the number of cancels sent. A second call does nothing.
    pub async fn stop(&self) -> usize {
        if self.shutdown.send_replace(true) {
            return 0;
        }
        info!("Stopping engine");

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Engine task panicked");
            }
        }

        let cancelled = self.executor.shutdown().await;
        if cancelled > 0 {
            warn!(cancelled, "Cancelled unsettled primary orders");
        }
        info!("Engine stopped");
        cancelled
    }
}
