//! Market module for pairs and the secondary-venue quote source.
//!
//! This module handles:
//! - Pair, side and per-asset table types
//! - Counterparty quotes and their HTTP client
//! - Mock collaborators for testing

pub mod mock;
pub mod quote;
pub mod types;

pub use mock::{MockBalanceSource, MockConfig, MockDepthProvider};
pub use quote::{CounterpartyQuote, DepthProvider, HttpQuoteClient, QuoteLevel};
pub use types::{AssetTable, Side, TradingPair};
