//! Pair, side and per-asset table types shared across venues.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Order book side, also used as the execution category of an opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString)]
pub enum Side {
    /// Sell base for quote.
    #[serde(rename = "ASK", alias = "A", alias = "ask")]
    #[strum(to_string = "ASK", serialize = "A", serialize = "ask")]
    Ask,
    /// Buy base with quote.
    #[serde(rename = "BID", alias = "B", alias = "bid")]
    #[strum(to_string = "BID", serialize = "B", serialize = "bid")]
    Bid,
}

impl Side {
    /// Get the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Ask => Side::Bid,
            Side::Bid => Side::Ask,
        }
    }

    /// Single-letter code used inside order memos.
    pub fn code(&self) -> &'static str {
        match self {
            Side::Ask => "A",
            Side::Bid => "B",
        }
    }
}

/// A (base, quote) asset pair; identity key for books and opportunities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TradingPair {
    /// Asset being priced.
    pub base: Uuid,
    /// Asset prices are denominated in.
    pub quote: Uuid,
}

impl TradingPair {
    /// Create a pair.
    pub fn new(base: Uuid, quote: Uuid) -> Self {
        Self { base, quote }
    }

    /// Market identifier used by the book feed (`BASE-QUOTE`).
    pub fn market_id(&self) -> String {
        self.to_string()
    }

    /// Assets (sent, received) when trading on `side`.
    pub fn give_get(&self, side: Side) -> (Uuid, Uuid) {
        match side {
            Side::Ask => (self.base, self.quote),
            Side::Bid => (self.quote, self.base),
        }
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

impl FromStr for TradingPair {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        // Hyphenated uuids are 36 chars, so the separator sits at byte 36.
        let (base, quote) = match s.split_once('/') {
            Some(parts) => parts,
            None if s.len() == 73 && s.as_bytes()[36] == b'-' => (&s[..36], &s[37..]),
            None => return Err(format!("invalid trading pair '{}'", s)),
        };
        let base = Uuid::parse_str(base.trim()).map_err(|e| format!("invalid base asset: {}", e))?;
        let quote = Uuid::parse_str(quote.trim()).map_err(|e| format!("invalid quote asset: {}", e))?;
        if base == quote {
            return Err("base and quote must differ".to_string());
        }
        Ok(Self { base, quote })
    }
}

impl TryFrom<String> for TradingPair {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TradingPair> for String {
    fn from(pair: TradingPair) -> Self {
        pair.to_string()
    }
}

/// Per-asset business data supplied as `asset:value,asset:value`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetTable<V> {
    entries: HashMap<Uuid, V>,
}

impl<V: Copy> AssetTable<V> {
    /// Look up the value for an asset.
    pub fn get(&self, asset: &Uuid) -> Option<V> {
        self.entries.get(asset).copied()
    }

    /// Look up with a fallback.
    pub fn get_or(&self, asset: &Uuid, fallback: V) -> V {
        self.get(asset).unwrap_or(fallback)
    }

    /// Number of configured assets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no asset is configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> FromIterator<(Uuid, V)> for AssetTable<V> {
    fn from_iter<I: IntoIterator<Item = (Uuid, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<V> FromStr for AssetTable<V>
where
    V: FromStr,
    V::Err: fmt::Display,
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut entries = HashMap::new();
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let (asset, value) = item
                .rsplit_once(':')
                .ok_or_else(|| format!("expected asset:value, got '{}'", item))?;
            let asset = Uuid::parse_str(asset.trim()).map_err(|e| format!("{}: {}", asset, e))?;
            let value = value
                .trim()
                .parse::<V>()
                .map_err(|e| format!("{}: {}", item, e))?;
            entries.insert(asset, value);
        }
        Ok(Self { entries })
    }
}

impl<'de, V> Deserialize<'de> for AssetTable<V>
where
    V: FromStr,
    V::Err: fmt::Display,
{
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const XIN: &str = "c94ac88f-4671-3976-b60a-09064f1811e8";
    const USDT: &str = "815b0b1a-2764-3736-8faa-42d694fa620a";

    #[test]
    fn side_codes_and_parsing() {
        assert_eq!(Side::Ask.code(), "A");
        assert_eq!(Side::Bid.opposite(), Side::Ask);
        assert_eq!(Side::from_str("B").unwrap(), Side::Bid);
        assert_eq!(Side::from_str("ASK").unwrap(), Side::Ask);
        let side: Side = serde_json::from_str("\"BID\"").unwrap();
        assert_eq!(side, Side::Bid);
    }

    #[test]
    fn pair_parses_hyphenated_market_id() {
        let id = format!("{}-{}", XIN, USDT);
        let pair: TradingPair = id.parse().unwrap();
        assert_eq!(pair.base.to_string(), XIN);
        assert_eq!(pair.quote.to_string(), USDT);
        assert_eq!(pair.market_id(), id);

        let slash: TradingPair = format!("{}/{}", XIN, USDT).parse().unwrap();
        assert_eq!(slash, pair);
        assert!("not-a-pair".parse::<TradingPair>().is_err());
    }

    #[test]
    fn give_get_follows_side() {
        let pair: TradingPair = format!("{}/{}", XIN, USDT).parse().unwrap();
        assert_eq!(pair.give_get(Side::Ask), (pair.base, pair.quote));
        assert_eq!(pair.give_get(Side::Bid), (pair.quote, pair.base));
    }

    #[test]
    fn asset_table_parses_entries() {
        let table: AssetTable<Decimal> = format!("{}:1, {}:0.0001", USDT, XIN).parse().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&Uuid::parse_str(USDT).unwrap()), Some(dec!(1)));
        assert_eq!(table.get_or(&Uuid::nil(), dec!(5)), dec!(5));

        let empty: AssetTable<u32> = "".parse().unwrap();
        assert!(empty.is_empty());
        assert!("bogus".parse::<AssetTable<u32>>().is_err());
    }
}
