//! Book-diff feed events and their JSON wire shape.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::types::PriceLevel;
use crate::error::BookError;
use crate::market::Side;

/// Kind of book-diff event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum BookEventKind {
    /// A new order rests on the book.
    #[serde(rename = "ORDER-OPEN", alias = "OPEN")]
    Open,
    /// A resting order was cancelled.
    #[serde(rename = "ORDER-CANCEL", alias = "CANCEL")]
    Cancel,
    /// A resting order was (partially) matched.
    #[serde(rename = "ORDER-MATCH", alias = "MATCH")]
    Match,
    /// Full book snapshot.
    #[serde(rename = "BOOK-T0", alias = "RESET")]
    Reset,
}

/// Incremental change to one price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LevelChange {
    /// Side of the book the level lives on.
    pub side: Side,
    /// Level price.
    pub price: Decimal,
    /// Base amount added or removed.
    pub amount: Decimal,
    /// Quote funds added or removed; derived from price when absent.
    #[serde(default)]
    pub funds: Option<Decimal>,
}

impl LevelChange {
    /// Funds carried by this change.
    pub fn funds(&self) -> Decimal {
        self.funds.unwrap_or(self.amount * self.price)
    }
}

/// Event payload, already shaped by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookPayload {
    /// OPEN, CANCEL or MATCH.
    Change(LevelChange),
    /// BOOK-T0.
    Reset {
        /// Bid levels as sent.
        bids: Vec<PriceLevel>,
        /// Ask levels as sent.
        asks: Vec<PriceLevel>,
    },
}

/// One sequenced book-diff event for a market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookEvent {
    /// Market id (`BASE-QUOTE`).
    pub market: String,
    /// Event kind.
    pub kind: BookEventKind,
    /// Feed sequence number.
    pub sequence: u64,
    /// Kind-specific payload.
    pub payload: BookPayload,
    /// Event time.
    pub timestamp: OffsetDateTime,
}

impl BookEvent {
    /// Build an incremental event.
    pub fn change(market: impl Into<String>, kind: BookEventKind, sequence: u64, change: LevelChange) -> Self {
        Self {
            market: market.into(),
            kind,
            sequence,
            payload: BookPayload::Change(change),
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Build a full reset event.
    pub fn reset(market: impl Into<String>, sequence: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        Self {
            market: market.into(),
            kind: BookEventKind::Reset,
            sequence,
            payload: BookPayload::Reset { bids, asks },
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Parse a feed event from its JSON form.
    pub fn from_json(value: serde_json::Value) -> Result<Self, BookError> {
        let raw: RawBookEvent =
            serde_json::from_value(value).map_err(|e| BookError::Malformed(e.to_string()))?;
        raw.try_into()
    }
}

/// Event as it appears on the wire.
#[derive(Debug, Deserialize)]
struct RawBookEvent {
    market: String,
    event: BookEventKind,
    #[serde(deserialize_with = "sequence_from_str_or_number")]
    sequence: u64,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: Decimal,
    amount: Decimal,
    #[serde(default)]
    funds: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct RawReset {
    #[serde(default)]
    asks: Vec<RawLevel>,
    #[serde(default)]
    bids: Vec<RawLevel>,
}

impl TryFrom<RawBookEvent> for BookEvent {
    type Error = BookError;

    fn try_from(raw: RawBookEvent) -> Result<Self, Self::Error> {
        let payload = match raw.event {
            BookEventKind::Reset => {
                let reset: RawReset = serde_json::from_value(raw.data)
                    .map_err(|e| BookError::Malformed(format!("BOOK-T0 payload: {}", e)))?;
                let to_levels = |levels: Vec<RawLevel>| {
                    levels
                        .into_iter()
                        .map(|l| PriceLevel::new(l.price, l.amount, l.funds.unwrap_or(l.amount * l.price)))
                        .collect::<Vec<_>>()
                };
                BookPayload::Reset {
                    bids: to_levels(reset.bids),
                    asks: to_levels(reset.asks),
                }
            }
            _ => {
                let change: LevelChange = serde_json::from_value(raw.data)
                    .map_err(|e| BookError::Malformed(format!("{:?} payload: {}", raw.event, e)))?;
                BookPayload::Change(change)
            }
        };

        let timestamp = raw
            .timestamp
            .as_deref()
            .and_then(|ts| OffsetDateTime::parse(ts, &Rfc3339).ok())
            .unwrap_or_else(OffsetDateTime::now_utc);

        Ok(Self {
            market: raw.market,
            kind: raw.event,
            sequence: raw.sequence,
            payload,
            timestamp,
        })
    }
}

fn sequence_from_str_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Sequence {
        Number(u64),
        Text(String),
    }

    match Sequence::deserialize(deserializer)? {
        Sequence::Number(n) => Ok(n),
        Sequence::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}
