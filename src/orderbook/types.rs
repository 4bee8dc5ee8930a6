//! Order book types and data structures.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::market::Side;

/// Single price level in an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceLevel {
    /// Price at this level.
    pub price: Decimal,
    /// Total base amount resting at this price.
    pub amount: Decimal,
    /// Total quote funds resting at this price, tracked independently of amount.
    pub funds: Decimal,
}

impl PriceLevel {
    /// Create a new price level.
    pub fn new(price: Decimal, amount: Decimal, funds: Decimal) -> Self {
        Self { price, amount, funds }
    }

    /// A level with non-positive amount or funds must not stay in the book.
    pub fn is_empty(&self) -> bool {
        self.amount <= Decimal::ZERO || self.funds <= Decimal::ZERO
    }
}

/// The most recent match seen on the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradePrint {
    /// Match price.
    pub price: Decimal,
    /// Matched base amount.
    pub amount: Decimal,
    /// Taker side as reported by the feed.
    pub side: Side,
    /// When the match happened.
    pub timestamp: OffsetDateTime,
}

/// Read-only bounded view of both sides of a book.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Depth {
    /// Bid levels sorted by price descending.
    pub bids: Vec<PriceLevel>,
    /// Ask levels sorted by price ascending.
    pub asks: Vec<PriceLevel>,
}

impl Depth {
    /// Get the best bid level.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Get the best ask level.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Whether both sides are empty.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// Point-in-time snapshot published by the book writer to readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookSnapshot {
    /// Bounded depth.
    pub depth: Depth,
    /// Most recent trade print, if any.
    pub last_trade: Option<TradePrint>,
    /// Sequence of the last applied event.
    pub sequence: Option<u64>,
    /// Whether the book is waiting for a full reset.
    pub needs_resync: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_level_detection() {
        assert!(!PriceLevel::new(dec!(1), dec!(2), dec!(2)).is_empty());
        assert!(PriceLevel::new(dec!(1), dec!(0), dec!(2)).is_empty());
        assert!(PriceLevel::new(dec!(1), dec!(2), dec!(-0.1)).is_empty());
    }

    #[test]
    fn depth_best_levels() {
        let depth = Depth {
            bids: vec![
                PriceLevel::new(dec!(99), dec!(1), dec!(99)),
                PriceLevel::new(dec!(98), dec!(1), dec!(98)),
            ],
            asks: vec![PriceLevel::new(dec!(100), dec!(2), dec!(200))],
        };

        assert_eq!(depth.best_bid().map(|l| l.price), Some(dec!(99)));
        assert_eq!(depth.best_ask().map(|l| l.amount), Some(dec!(2)));
        assert!(!depth.is_empty());
        assert!(Depth::default().is_empty());
    }
}
