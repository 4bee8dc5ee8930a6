//! Sequenced L2 order book for one trading pair.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::event::{BookEvent, BookEventKind, BookPayload, LevelChange};
use super::types::{BookSnapshot, Depth, PriceLevel, TradePrint};
use crate::error::BookError;
use crate::market::{Side, TradingPair};

/// L2 book rebuilt from the book-diff stream.
///
/// Owned by exactly one writer task; readers only see [`BookSnapshot`]s.
#[derive(Debug, Clone)]
pub struct OrderBook {
    pair: TradingPair,
    /// Bid levels keyed so iteration yields descending prices.
    bids: BTreeMap<Reverse<Decimal>, PriceLevel>,
    /// Ask levels in ascending price order.
    asks: BTreeMap<Decimal, PriceLevel>,
    last_sequence: Option<u64>,
    needs_resync: bool,
    last_trade: Option<TradePrint>,
}

impl OrderBook {
    /// Create an empty book.
    pub fn new(pair: TradingPair) -> Self {
        Self {
            pair,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_sequence: None,
            needs_resync: false,
            last_trade: None,
        }
    }

    /// Pair this book tracks.
    pub fn pair(&self) -> TradingPair {
        self.pair
    }

    /// Sequence of the last applied event.
    pub fn sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Whether the book was invalidated and waits for a reset.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Most recent trade print.
    pub fn last_trade(&self) -> Option<TradePrint> {
        self.last_trade
    }

    /// Apply one event.
    ///
    /// Stale events are rejected without touching state. A sequence gap clears
    /// both sides and leaves the book waiting for a `BOOK-T0` reset.
    pub fn apply(&mut self, event: &BookEvent) -> Result<(), BookError> {
        if let Some(last) = self.last_sequence {
            if event.sequence <= last {
                return Err(BookError::StaleSequence {
                    sequence: event.sequence,
                    last,
                });
            }
            if event.sequence != last + 1 && event.kind != BookEventKind::Reset {
                self.invalidate();
                warn!(
                    pair = %self.pair,
                    expected = last + 1,
                    got = event.sequence,
                    "Book sequence gap, cleared"
                );
                return Err(BookError::SequenceGap {
                    expected: last + 1,
                    got: event.sequence,
                });
            }
        }

        match (&event.payload, event.kind) {
            (BookPayload::Reset { bids, asks }, BookEventKind::Reset) => {
                self.reset(bids, asks);
            }
            (BookPayload::Change(change), kind) if kind != BookEventKind::Reset => {
                if self.needs_resync {
                    return Err(BookError::AwaitingSnapshot {
                        sequence: event.sequence,
                    });
                }
                match kind {
                    BookEventKind::Open => self.adjust(change, Decimal::ONE),
                    BookEventKind::Cancel => self.adjust(change, Decimal::NEGATIVE_ONE),
                    _ => self.fill(change, event),
                }
            }
            (_, kind) => {
                return Err(BookError::Malformed(format!(
                    "{:?} event carries mismatched payload",
                    kind
                )));
            }
        }

        self.last_sequence = Some(event.sequence);
        Ok(())
    }

    /// Up to `limit` levels per side.
    pub fn depth(&self, limit: usize) -> Depth {
        if self.needs_resync {
            return Depth::default();
        }
        Depth {
            bids: self.bids.values().take(limit).copied().collect(),
            asks: self.asks.values().take(limit).copied().collect(),
        }
    }

    /// Snapshot published to readers.
    pub fn snapshot(&self, limit: usize) -> BookSnapshot {
        BookSnapshot {
            depth: self.depth(limit),
            last_trade: self.last_trade,
            sequence: self.last_sequence,
            needs_resync: self.needs_resync,
        }
    }

    fn invalidate(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_sequence = None;
        self.needs_resync = true;
    }

    fn reset(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bids.clear();
        self.asks.clear();
        for level in bids.iter().filter(|l| !l.is_empty()) {
            self.bids.insert(Reverse(level.price), *level);
        }
        for level in asks.iter().filter(|l| !l.is_empty()) {
            self.asks.insert(level.price, *level);
        }
        self.needs_resync = false;
        debug!(
            pair = %self.pair,
            bids = self.bids.len(),
            asks = self.asks.len(),
            "Book reset applied"
        );
    }

    /// OPEN (`sign` = 1) or CANCEL (`sign` = -1).
    fn adjust(&mut self, change: &LevelChange, sign: Decimal) {
        let amount = change.amount * sign;
        let funds = change.funds() * sign;
        let create = sign.is_sign_positive();
        match change.side {
            Side::Bid => adjust_level(&mut self.bids, Reverse(change.price), change.price, amount, funds, create),
            Side::Ask => adjust_level(&mut self.asks, change.price, change.price, amount, funds, create),
        }
    }

    /// MATCH consumes liquidity at the price wherever it rests.
    fn fill(&mut self, change: &LevelChange, event: &BookEvent) {
        let amount = -change.amount;
        let funds = -change.funds();
        adjust_level(&mut self.asks, change.price, change.price, amount, funds, false);
        adjust_level(&mut self.bids, Reverse(change.price), change.price, amount, funds, false);
        self.last_trade = Some(TradePrint {
            price: change.price,
            amount: change.amount,
            side: change.side,
            timestamp: event.timestamp,
        });
    }
}

fn adjust_level<K: Ord>(
    tree: &mut BTreeMap<K, PriceLevel>,
    key: K,
    price: Decimal,
    amount: Decimal,
    funds: Decimal,
    create: bool,
) {
    let updated = match tree.get(&key) {
        Some(level) => PriceLevel::new(price, level.amount + amount, level.funds + funds),
        None if create => PriceLevel::new(price, amount, funds),
        None => return,
    };
    if updated.is_empty() {
        tree.remove(&key);
    } else {
        tree.insert(key, updated);
    }
}
