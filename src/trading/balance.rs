//! Periodically refreshed asset balances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SettlementError;

/// Source of the operator's asset balances.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Every asset with its available balance.
    async fn balances(&self) -> Result<HashMap<Uuid, Decimal>, SettlementError>;
}

/// Read-mostly asset → balance map. Unknown assets read as zero.
#[derive(Debug, Clone, Default)]
pub struct BalanceCache {
    balances: Arc<DashMap<Uuid, Decimal>>,
}

impl BalanceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Available balance of `asset`.
    pub fn get(&self, asset: &Uuid) -> Decimal {
        self.balances.get(asset).map(|b| *b).unwrap_or_default()
    }

    /// Overwrite one balance.
    pub fn set(&self, asset: Uuid, balance: Decimal) {
        self.balances.insert(asset, balance);
    }

    /// Number of known assets.
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    /// True before the first successful refresh.
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Pull fresh balances. On failure the previous values are kept.
    pub async fn refresh(&self, source: &dyn BalanceSource) -> Result<usize, SettlementError> {
        let fresh = source.balances().await?;
        let count = fresh.len();
        for (asset, balance) in fresh {
            self.balances.insert(asset, balance);
        }
        Ok(count)
    }

    /// Refresh now and then every `period` until shutdown.
    pub async fn run(
        self,
        source: Arc<dyn BalanceSource>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "Balance refresh started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    match self.refresh(source.as_ref()).await {
                        Ok(count) => debug!(assets = count, "Balances refreshed"),
                        Err(e) => warn!(error = %e, "Balance refresh failed, keeping last known balances"),
                    }
                }
            }
        }

        info!("Balance refresh stopped");
    }
}
