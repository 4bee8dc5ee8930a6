//! Trading module for primary orders and settlement-backed execution.
//!
//! This module handles:
//! - Primary order validation and trace ids
//! - Venue legs sent as settlement transfers
//! - Transfer serialization and the cancel delay queue
//! - Shared trading state and cached balances

pub mod balance;
pub mod execution;
pub mod locks;
pub mod order;
pub mod schedule;
pub mod state;

pub use balance::{BalanceCache, BalanceSource};
pub use execution::VenueGateway;
pub use locks::TransferLocks;
pub use order::{batch_trace_id, primary_trace_id, secondary_trace_id, PrimaryOrder};
pub use schedule::{CancelSchedule, CancelTimer};
pub use state::{Registration, SharedTradingState, TradingState};
