//! Cross-venue arbitrage engine.
//!
//! Watches the order book of a primary exchange, compares its top of book
//! against an OTC counterparty's quote, places primary orders when the spread
//! beats the fee-adjusted threshold, and offsets the filled position on the
//! counterparty. Every trade is a transfer on a settlement network; confirmations
//! coming back from it are attributed to the opportunity that caused them.
//!
//! # Flow
//!
//! ```text
//! book feed ─► book writer ─► detector ─► queue ─► intake ─► primary order
//!                                                              │
//! settlement confirmations ─► reconciler ─► accumulators ─► sweep ─► offset
//!                                                              │
//!                                                  failed ledger ─► batch
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`market`]: Pairs, sides and the counterparty quote client
//! - [`orderbook`]: Book state machine, writer task and websocket feed
//! - [`protocol`]: Binary memo codecs
//! - [`arbitrage`]: Opportunity detection and execution
//! - [`trading`]: Orders, venue gateway and shared trading state
//! - [`settlement`]: Settlement client, reconciler and poller
//! - [`audit`]: Opportunity record sink
//! - [`engine`]: Start/stop boundary
//! - [`utils`]: Utility functions

pub mod arbitrage;
pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod market;
pub mod metrics;
pub mod orderbook;
pub mod protocol;
pub mod settlement;
pub mod trading;
pub mod utils;

pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, Result};
