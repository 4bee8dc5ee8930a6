//! Settlement module for transfers and their confirmations.
//!
//! This module handles:
//! - Confirmation and transfer types
//! - The settlement API client
//! - Reconciling confirmations against tracked opportunities
//! - Polling the confirmation feed

pub mod client;
pub mod mock;
pub mod poller;
pub mod reconciler;
pub mod types;

pub use client::{HttpSettlementClient, SettlementClient};
pub use mock::MockSettlementClient;
pub use poller::ConfirmationPoller;
pub use reconciler::{Reconciliation, SettlementReconciler};
pub use types::{SettlementConfirmation, TransferRequest};
