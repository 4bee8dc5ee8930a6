//! Mock collaborators for unit and integration testing.
//!
//! These stand in for the counterparty quote API and the balance endpoint
//! without making real network requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::quote::{CounterpartyQuote, DepthProvider, QuoteLevel};
use super::types::TradingPair;
use crate::error::{MarketError, SettlementError};
use crate::trading::BalanceSource;

/// Configuration for mock behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Whether requests fail.
    pub fail: bool,
    /// Simulated latency in milliseconds.
    pub latency_ms: u64,
}

/// Mock counterparty quote source.
#[derive(Debug, Clone, Default)]
pub struct MockDepthProvider {
    config: Arc<Mutex<MockConfig>>,
    quotes: Arc<Mutex<HashMap<TradingPair, CounterpartyQuote>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockDepthProvider {
    /// Create an empty provider; unknown pairs fail with `NotQuoted`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the quote returned for `pair`.
    pub fn set_quote(&self, pair: TradingPair, quote: CounterpartyQuote) {
        self.quotes.lock().insert(pair, quote);
    }

    /// Set a quote with identical limits on both sides.
    pub fn set_prices(&self, pair: TradingPair, bid: Decimal, ask: Decimal, min: Decimal, max: Decimal) {
        let level = |price| QuoteLevel {
            price,
            min_amount: min,
            max_amount: max,
        };
        self.set_quote(
            pair,
            CounterpartyQuote {
                ask: level(ask),
                bid: level(bid),
            },
        );
    }

    /// Make every request fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.config.lock().fail = fail;
    }

    /// Number of quote requests served.
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl DepthProvider for MockDepthProvider {
    async fn quote(&self, pair: &TradingPair) -> Result<CounterpartyQuote, MarketError> {
        let config = self.config.lock().clone();
        if config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.latency_ms)).await;
        }
        *self.calls.lock() += 1;

        if config.fail {
            return Err(MarketError::FetchFailed {
                pair: pair.to_string(),
                reason: "Mock quote failure".to_string(),
            });
        }

        self.quotes
            .lock()
            .get(pair)
            .copied()
            .ok_or(MarketError::NotQuoted {
                send: pair.quote,
                get: pair.base,
            })
    }
}

/// Mock balance endpoint.
#[derive(Debug, Clone, Default)]
pub struct MockBalanceSource {
    config: Arc<Mutex<MockConfig>>,
    balances: Arc<Mutex<HashMap<Uuid, Decimal>>>,
}

impl MockBalanceSource {
    /// Create an empty balance source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the balance of one asset.
    pub fn set_balance(&self, asset: Uuid, balance: Decimal) {
        self.balances.lock().insert(asset, balance);
    }

    /// Make every request fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.config.lock().fail = fail;
    }
}

#[async_trait]
impl BalanceSource for MockBalanceSource {
    async fn balances(&self) -> Result<HashMap<Uuid, Decimal>, SettlementError> {
        if self.config.lock().fail {
            return Err(SettlementError::Api("Mock balance failure".to_string()));
        }
        Ok(self.balances.lock().clone())
    }
}
