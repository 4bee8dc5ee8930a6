//! Prometheus metrics for the book, the trading loops and settlement.
//!
//! This module provides metrics for:
//! - Book event application and resyncs
//! - Opportunity detection and queue backpressure
//! - Order placement, cancellation and offset trades
//! - Settlement confirmation matching
//! - Transfer and quote latency

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use tracing::debug;

// === Metric Name Constants ===

/// Settlement transfer latency metric name.
pub const METRIC_TRANSFER_LATENCY: &str = "transfer_latency_ms";
/// Counterparty quote latency metric name.
pub const METRIC_QUOTE_LATENCY: &str = "quote_latency_ms";
/// WebSocket message latency metric name.
pub const METRIC_WS_MESSAGE_LATENCY: &str = "ws_message_latency_ms";
/// Book events applied counter metric name.
pub const METRIC_BOOK_EVENTS_APPLIED: &str = "book_events_applied_total";
/// Book resyncs counter metric name.
pub const METRIC_BOOK_RESYNCS: &str = "book_resyncs_total";
/// Opportunities detected counter metric name.
pub const METRIC_OPPORTUNITIES_DETECTED: &str = "opportunities_detected_total";
/// Opportunities dropped on a full queue counter metric name.
pub const METRIC_OPPORTUNITIES_DROPPED: &str = "opportunities_dropped_total";
/// Fishing opportunities counter metric name.
pub const METRIC_FISHING_OPPORTUNITIES: &str = "fishing_opportunities_total";
/// Primary orders placed counter metric name.
pub const METRIC_ORDERS_PLACED: &str = "orders_placed_total";
/// Primary order cancels sent counter metric name.
pub const METRIC_ORDERS_CANCELLED: &str = "orders_cancelled_total";
/// Secondary offset trades counter metric name.
pub const METRIC_OFFSET_TRADES: &str = "offset_trades_total";
/// Opportunities marked success counter metric name.
pub const METRIC_OPPORTUNITIES_SUCCEEDED: &str = "opportunities_succeeded_total";
/// Opportunities marked failed counter metric name.
pub const METRIC_OPPORTUNITIES_FAILED: &str = "opportunities_failed_total";
/// Failed batches offset counter metric name.
pub const METRIC_BATCHES_DONE: &str = "batches_done_total";
/// Confirmations matched counter metric name.
pub const METRIC_CONFIRMATIONS_MATCHED: &str = "confirmations_matched_total";
/// Confirmations ignored counter metric name.
pub const METRIC_CONFIRMATIONS_IGNORED: &str = "confirmations_ignored_total";
/// Memo decode failures counter metric name.
pub const METRIC_MEMO_DECODE_ERRORS: &str = "memo_decode_errors_total";
/// WebSocket messages received counter metric name.
pub const METRIC_WS_MESSAGES_RECEIVED: &str = "ws_messages_received_total";
/// WebSocket reconnects counter metric name.
pub const METRIC_WS_RECONNECTS: &str = "ws_reconnects_total";

/// Initialize all metric descriptions.
/// Call this once at startup to register metrics with descriptions.
pub fn init_metrics() {
    // Latency histograms
    describe_histogram!(
        METRIC_TRANSFER_LATENCY,
        "Settlement transfer latency in milliseconds"
    );
    describe_histogram!(
        METRIC_QUOTE_LATENCY,
        "Counterparty quote latency in milliseconds"
    );
    describe_histogram!(
        METRIC_WS_MESSAGE_LATENCY,
        "WebSocket message processing latency in milliseconds"
    );

    // Counters
    describe_counter!(METRIC_BOOK_EVENTS_APPLIED, "Total number of book events applied");
    describe_counter!(METRIC_BOOK_RESYNCS, "Total number of book resyncs requested");
    describe_counter!(
        METRIC_OPPORTUNITIES_DETECTED,
        "Total number of arbitrage opportunities detected"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_DROPPED,
        "Total number of opportunities dropped on a full queue"
    );
    describe_counter!(
        METRIC_FISHING_OPPORTUNITIES,
        "Total number of opportunities synthesized from trade prints"
    );
    describe_counter!(METRIC_ORDERS_PLACED, "Total number of primary orders placed");
    describe_counter!(METRIC_ORDERS_CANCELLED, "Total number of primary cancels sent");
    describe_counter!(METRIC_OFFSET_TRADES, "Total number of secondary offset trades");
    describe_counter!(
        METRIC_OPPORTUNITIES_SUCCEEDED,
        "Total number of opportunities reconciled successfully"
    );
    describe_counter!(
        METRIC_OPPORTUNITIES_FAILED,
        "Total number of opportunities left with an unoffset residual"
    );
    describe_counter!(METRIC_BATCHES_DONE, "Total number of failed batches offset");
    describe_counter!(
        METRIC_CONFIRMATIONS_MATCHED,
        "Total number of settlement confirmations attributed"
    );
    describe_counter!(
        METRIC_CONFIRMATIONS_IGNORED,
        "Total number of settlement confirmations ignored"
    );
    describe_counter!(METRIC_MEMO_DECODE_ERRORS, "Total number of undecodable memos");
    describe_counter!(
        METRIC_WS_MESSAGES_RECEIVED,
        "Total number of WebSocket messages received"
    );
    describe_counter!(METRIC_WS_RECONNECTS, "Total number of WebSocket reconnections");

    debug!("Metrics initialized");
}

/// Record WebSocket message processing latency.
pub fn record_ws_message_latency(start: Instant) {
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_WS_MESSAGE_LATENCY).record(latency_ms);
}

/// Increment book events applied counter.
pub fn inc_book_events_applied() {
    counter!(METRIC_BOOK_EVENTS_APPLIED).increment(1);
}

/// Increment book resyncs counter.
pub fn inc_book_resyncs() {
    counter!(METRIC_BOOK_RESYNCS).increment(1);
}

/// Increment opportunities detected counter.
pub fn inc_opportunities_detected() {
    counter!(METRIC_OPPORTUNITIES_DETECTED).increment(1);
}

/// Increment opportunities dropped counter.
pub fn inc_opportunities_dropped() {
    counter!(METRIC_OPPORTUNITIES_DROPPED).increment(1);
}

/// Increment fishing opportunities counter.
pub fn inc_fishing_opportunities() {
    counter!(METRIC_FISHING_OPPORTUNITIES).increment(1);
}

/// Increment primary orders placed counter.
pub fn inc_orders_placed() {
    counter!(METRIC_ORDERS_PLACED).increment(1);
}

/// Increment primary cancels counter.
pub fn inc_orders_cancelled() {
    counter!(METRIC_ORDERS_CANCELLED).increment(1);
}

/// Increment offset trades counter.
pub fn inc_offset_trades() {
    counter!(METRIC_OFFSET_TRADES).increment(1);
}

/// Increment succeeded opportunities counter.
pub fn inc_opportunities_succeeded() {
    counter!(METRIC_OPPORTUNITIES_SUCCEEDED).increment(1);
}

/// Increment failed opportunities counter.
pub fn inc_opportunities_failed() {
    counter!(METRIC_OPPORTUNITIES_FAILED).increment(1);
}

/// Increment batches done counter.
pub fn inc_batches_done() {
    counter!(METRIC_BATCHES_DONE).increment(1);
}

/// Increment matched confirmations counter.
pub fn inc_confirmations_matched() {
    counter!(METRIC_CONFIRMATIONS_MATCHED).increment(1);
}

/// Increment ignored confirmations counter, labelled by reason.
pub fn inc_confirmations_ignored(reason: &'static str) {
    counter!(METRIC_CONFIRMATIONS_IGNORED, "reason" => reason).increment(1);
}

/// Increment memo decode errors counter.
pub fn inc_memo_decode_errors() {
    counter!(METRIC_MEMO_DECODE_ERRORS).increment(1);
}

/// Increment WebSocket messages received counter.
pub fn inc_ws_messages_received() {
    counter!(METRIC_WS_MESSAGES_RECEIVED).increment(1);
}

/// Increment WebSocket reconnects counter.
pub fn inc_ws_reconnects() {
    counter!(METRIC_WS_RECONNECTS).increment(1);
}

/// RAII guard for timing operations.
/// Automatically records latency when dropped.
pub struct LatencyTimer {
    start: Instant,
    metric_name: &'static str,
}

impl LatencyTimer {
    /// Create a new latency timer for the given metric.
    pub fn new(metric_name: &'static str) -> Self {
        Self {
            start: Instant::now(),
            metric_name,
        }
    }

    /// Get elapsed time in milliseconds (without recording).
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(self.metric_name).record(self.elapsed_ms());
    }
}

/// Create a latency timer for settlement transfers.
pub fn timer_transfer() -> LatencyTimer {
    LatencyTimer::new(METRIC_TRANSFER_LATENCY)
}

/// Create a latency timer for counterparty quotes.
pub fn timer_quote() -> LatencyTimer {
    LatencyTimer::new(METRIC_QUOTE_LATENCY)
}
