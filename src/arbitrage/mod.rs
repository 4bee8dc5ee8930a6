//! Arbitrage module for detecting and executing opportunities.
//!
//! This module handles:
//! - Profit, threshold and amount calculations
//! - Opportunity detection from the primary book and counterparty quotes
//! - Placing, offsetting and batching trades

pub mod calculator;
pub mod detector;
pub mod executor;

pub use calculator::{
    clamp_amount, limit_amount, opportunity_id, profit_ratio, profit_threshold, qualifies,
    ArbitrageOpportunity, OpportunityStatus,
};
pub use detector::OpportunityDetector;
pub use executor::{ExecutorStats, IntakeOutcome, TradeExecutor};
