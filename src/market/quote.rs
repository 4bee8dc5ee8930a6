//! Secondary-venue quote source.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::types::TradingPair;
use crate::config::Config;
use crate::error::MarketError;
use crate::metrics;

/// One side of a counterparty quote, amounts in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteLevel {
    /// Price in quote per base.
    pub price: Decimal,
    /// Smallest tradeable base amount.
    pub min_amount: Decimal,
    /// Largest tradeable base amount.
    pub max_amount: Decimal,
}

/// Counterparty quote for a pair.
///
/// `ask` is what the counterparty charges for base we buy from it; `bid` is
/// what it pays for base we sell to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterpartyQuote {
    /// We send quote and receive base.
    pub ask: QuoteLevel,
    /// We send base and receive quote.
    pub bid: QuoteLevel,
}

/// Request/response source of counterparty quotes.
#[async_trait]
pub trait DepthProvider: Send + Sync {
    /// Fetch the current quote for `pair`.
    async fn quote(&self, pair: &TradingPair) -> Result<CounterpartyQuote, MarketError>;
}

/// Ticker as served by the quote API.
#[derive(Debug, Clone, Deserialize)]
pub struct Ticker {
    /// Asset paid out by the counterparty.
    pub exchange_asset: Uuid,
    /// Asset sent to the counterparty.
    pub base_asset: Uuid,
    /// Price of one paid-out unit in the sent asset.
    pub price: Decimal,
    /// Smallest accepted amount of the sent asset.
    pub minimum_amount: Decimal,
    /// Largest accepted amount of the sent asset.
    pub maximum_amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(default)]
    data: std::collections::HashMap<String, Ticker>,
}

/// HTTP client for the counterparty quote API.
#[derive(Debug, Clone)]
pub struct HttpQuoteClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpQuoteClient {
    /// Create a client from config.
    pub fn new(config: &Config) -> Result<Self, MarketError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(Duration::from_millis(500))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            http,
            base_url: config.quote_api_url.trim_end_matches('/').to_string(),
            timeout: config.http_timeout(),
        })
    }

    /// Fetch the directed ticker for sending `send` and receiving `get`.
    #[instrument(skip(self))]
    pub async fn ticker(&self, send: Uuid, get: Uuid) -> Result<Ticker, MarketError> {
        let _timer = metrics::timer_quote();
        let url = format!("{}/markets", self.base_url);
        let pair = format!("{}-{}", send, get);

        let request = self
            .http
            .get(&url)
            .query(&[("base_asset", send.to_string()), ("exchange_asset", get.to_string())])
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| MarketError::Timeout)??;

        if !response.status().is_success() {
            return Err(MarketError::FetchFailed {
                pair,
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: TickerResponse = response
            .json()
            .await
            .map_err(|e| MarketError::ParseError(format!("Failed to parse tickers: {}", e)))?;

        body.data
            .into_values()
            .find(|t| t.exchange_asset == get && t.base_asset == send)
            .ok_or(MarketError::NotQuoted { send, get })
    }
}

/// Combine the two directed tickers of a pair into one quote.
///
/// `ask` sends quote for base, priced in quote per base. `bid` sends base for
/// quote, priced in base per quote, so its price is inverted.
pub fn quote_from_tickers(ask: &Ticker, bid: &Ticker) -> Result<CounterpartyQuote, MarketError> {
    if ask.price.is_zero() || bid.price.is_zero() {
        return Err(MarketError::ParseError("zero ticker price".to_string()));
    }

    Ok(CounterpartyQuote {
        ask: QuoteLevel {
            price: ask.price,
            min_amount: ask.minimum_amount / ask.price,
            max_amount: ask.maximum_amount / ask.price,
        },
        bid: QuoteLevel {
            price: Decimal::ONE / bid.price,
            min_amount: bid.minimum_amount,
            max_amount: bid.maximum_amount,
        },
    })
}

#[async_trait]
impl DepthProvider for HttpQuoteClient {
    async fn quote(&self, pair: &TradingPair) -> Result<CounterpartyQuote, MarketError> {
        let ask = self.ticker(pair.quote, pair.base).await?;
        let bid = self.ticker(pair.base, pair.quote).await?;
        let quote = quote_from_tickers(&ask, &bid)?;
        debug!(pair = %pair, ask = %quote.ask.price, bid = %quote.bid.price, "Fetched counterparty quote");
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker(send: u128, get: u128, price: Decimal, min: Decimal, max: Decimal) -> Ticker {
        Ticker {
            exchange_asset: Uuid::from_u128(get),
            base_asset: Uuid::from_u128(send),
            price,
            minimum_amount: min,
            maximum_amount: max,
        }
    }

    #[test]
    fn tickers_combine_into_base_units() {
        let ask = ticker(2, 1, dec!(100), dec!(10), dec!(1000));
        let bid = ticker(1, 2, dec!(0.01), dec!(0.1), dec!(10));
        let quote = quote_from_tickers(&ask, &bid).unwrap();

        assert_eq!(quote.ask.price, dec!(100));
        assert_eq!(quote.ask.min_amount, dec!(0.1));
        assert_eq!(quote.ask.max_amount, dec!(10));
        assert_eq!(quote.bid.price, dec!(100));
        assert_eq!(quote.bid.min_amount, dec!(0.1));
        assert_eq!(quote.bid.max_amount, dec!(10));
    }

    #[test]
    fn zero_price_is_rejected() {
        let ask = ticker(1, 2, Decimal::ZERO, dec!(1), dec!(1));
        let bid = ticker(2, 1, dec!(1), dec!(1), dec!(1));
        assert!(matches!(
            quote_from_tickers(&ask, &bid),
            Err(MarketError::ParseError(_))
        ));
    }

    #[test]
    fn ticker_response_parses() {
        let json = r#"{"data":{"1":{"exchange_asset":"00000000-0000-0000-0000-000000000001","base_asset":"00000000-0000-0000-0000-000000000002","price":"1.5","minimum_amount":"1","maximum_amount":"100"}}}"#;
        let body: TickerResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.data["1"].price, dec!(1.5));
    }
}
