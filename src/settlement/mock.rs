//! Mock settlement client for unit and integration testing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;

use super::client::SettlementClient;
use super::types::{SettlementConfirmation, TransferRequest};
use crate::error::SettlementError;
use crate::market::MockConfig;

/// Records outbound transfers and serves queued confirmations.
#[derive(Debug, Clone, Default)]
pub struct MockSettlementClient {
    config: Arc<Mutex<MockConfig>>,
    transfers: Arc<Mutex<Vec<TransferRequest>>>,
    confirmations: Arc<Mutex<Vec<SettlementConfirmation>>>,
    attempts: Arc<Mutex<usize>>,
}

impl MockSettlementClient {
    /// Create a client that accepts every transfer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers accepted so far, in order.
    pub fn transfers(&self) -> Vec<TransferRequest> {
        self.transfers.lock().clone()
    }

    /// Transfer calls made, including failed ones.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }

    /// Make every call fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.config.lock().fail = fail;
    }

    /// Delay every call by `latency_ms`.
    pub fn set_latency_ms(&self, latency_ms: u64) {
        self.config.lock().latency_ms = latency_ms;
    }

    /// Queue a confirmation for the feed.
    pub fn push_confirmation(&self, confirmation: SettlementConfirmation) {
        self.confirmations.lock().push(confirmation);
    }

    async fn simulate(&self) -> Result<(), SettlementError> {
        let config = self.config.lock().clone();
        if config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.latency_ms)).await;
        }
        if config.fail {
            return Err(SettlementError::Api("Mock settlement failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementClient for MockSettlementClient {
    async fn transfer(&self, request: &TransferRequest) -> Result<(), SettlementError> {
        *self.attempts.lock() += 1;
        self.simulate().await?;

        let mut transfers = self.transfers.lock();
        if !transfers.iter().any(|t| t.trace_id == request.trace_id) {
            transfers.push(request.clone());
        }
        Ok(())
    }

    async fn confirmations(
        &self,
        since: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<SettlementConfirmation>, SettlementError> {
        self.simulate().await?;

        let mut records: Vec<_> = self
            .confirmations
            .lock()
            .iter()
            .filter(|c| c.created_at >= since)
            .cloned()
            .collect();
        records.sort_by_key(|c| c.created_at);
        records.truncate(limit);
        Ok(records)
    }
}
