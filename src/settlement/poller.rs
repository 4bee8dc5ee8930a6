//! Polls the settlement feed and feeds the reconciler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::client::SettlementClient;
use super::reconciler::SettlementReconciler;

/// How far back the first poll reaches.
pub const INITIAL_LOOKBACK: time::Duration = time::Duration::minutes(5);

/// Checkpointed confirmation poller.
pub struct ConfirmationPoller {
    client: Arc<dyn SettlementClient>,
    reconciler: Arc<SettlementReconciler>,
    checkpoint: OffsetDateTime,
    /// Records at the checkpoint that failed to reconcile; the inclusive
    /// checkpoint fetches them again.
    rejected: HashSet<String>,
    page_limit: usize,
    timeout: Duration,
}

impl ConfirmationPoller {
    /// Create a poller starting [`INITIAL_LOOKBACK`] in the past.
    pub fn new(
        client: Arc<dyn SettlementClient>,
        reconciler: Arc<SettlementReconciler>,
        page_limit: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            reconciler,
            checkpoint: OffsetDateTime::now_utc() - INITIAL_LOOKBACK,
            rejected: HashSet::new(),
            page_limit,
            timeout,
        }
    }

    /// Timestamp the next poll starts from.
    pub fn checkpoint(&self) -> OffsetDateTime {
        self.checkpoint
    }

    /// Fetch one page and reconcile it. Returns the number of records fetched.
    pub async fn poll_once(&mut self) -> usize {
        let page = match tokio::time::timeout(
            self.timeout,
            self.client.confirmations(self.checkpoint, self.page_limit),
        )
        .await
        {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                warn!(error = %e, retryable = e.is_retryable(), "Confirmation fetch failed");
                return 0;
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Confirmation fetch timed out");
                return 0;
            }
        };

        for confirmation in &page {
            if self.rejected.contains(&confirmation.id) {
                continue;
            }
            if let Err(e) = self.reconciler.on_confirmation(confirmation) {
                error!(
                    confirmation_id = %confirmation.id,
                    asset = %confirmation.asset_id,
                    amount = %confirmation.amount,
                    error = %e,
                    "Confirmation not reconciled"
                );
                self.rejected.insert(confirmation.id.clone());
            }
        }
        if let Some(last) = page.last() {
            let at = last.created_at;
            self.rejected
                .retain(|id| page.iter().any(|c| c.created_at == at && &c.id == id));
            self.checkpoint = at;
        }

        debug!(records = page.len(), checkpoint = %self.checkpoint, "Confirmations polled");
        page.len()
    }

    /// Poll every `period` until shutdown.
    pub async fn run(mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "Confirmation poller started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        info!("Confirmation poller stopped");
    }
}
