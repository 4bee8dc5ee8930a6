//! Venue legs expressed as settlement transfers.
//!
//! Every order, cancel and offset trade is an outbound transfer carrying a
//! memo. Transfers to the same `(recipient, asset)` are serialized through the
//! lock pool and every call is bounded by the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::locks::TransferLocks;
use super::order::PrimaryOrder;
use crate::config::Config;
use crate::error::TradingError;
use crate::market::{AssetTable, Side, TradingPair};
use crate::metrics;
use crate::protocol::{OrderAction, OtcOrderAction};
use crate::settlement::{SettlementClient, TransferRequest};

/// Sends primary orders, cancels and secondary offsets.
pub struct VenueGateway {
    client: Arc<dyn SettlementClient>,
    locks: TransferLocks,
    brokers: Vec<Uuid>,
    secondary_routing_id: Uuid,
    cancel_asset_id: Uuid,
    cancel_amount: Decimal,
    asset_precisions: AssetTable<u32>,
    default_asset_precision: u32,
    enable_primary: bool,
    enable_secondary: bool,
    timeout: Duration,
}

impl std::fmt::Debug for VenueGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueGateway")
            .field("brokers", &self.brokers.len())
            .field("secondary_routing_id", &self.secondary_routing_id)
            .field("lock_shards", &self.locks.len())
            .finish()
    }
}

impl VenueGateway {
    /// Create a gateway over `client`.
    pub fn new(config: &Config, client: Arc<dyn SettlementClient>) -> Self {
        Self {
            client,
            locks: TransferLocks::new(config.transfer_lock_shards),
            brokers: config.primary_broker_ids.clone(),
            secondary_routing_id: config.secondary_routing_id,
            cancel_asset_id: config.cancel_asset_id,
            cancel_amount: config.cancel_amount,
            asset_precisions: config.asset_precisions.clone(),
            default_asset_precision: config.default_asset_precision,
            enable_primary: config.enable_primary,
            enable_secondary: config.enable_secondary,
            timeout: config.http_timeout(),
        }
    }

    /// Fund `order` by sending its give asset to a primary broker.
    #[instrument(skip(self, order), fields(pair = %order.pair, side = %order.side, trace_id = %order.trace_id))]
    pub async fn place_primary(&self, order: &PrimaryOrder) -> Result<(), TradingError> {
        if !self.enable_primary {
            return Err(TradingError::VenueDisabled("primary"));
        }

        let request = TransferRequest {
            asset_id: order.give_asset(),
            recipient_id: self.random_broker()?,
            amount: order.amount,
            trace_id: order.trace_id,
            memo: order.action().pack()?,
        };
        self.send(&request).await?;

        metrics::inc_orders_placed();
        info!(price = %order.price, amount = %order.amount, "Primary order placed");
        Ok(())
    }

    /// Ask the primary venue to cancel the order funded by `order_trace`.
    /// Returns the trace id of the dust transfer carrying the cancel.
    #[instrument(skip(self))]
    pub async fn cancel_primary(&self, order_trace: Uuid) -> Result<Uuid, TradingError> {
        let request = TransferRequest {
            asset_id: self.cancel_asset_id,
            recipient_id: self.random_broker()?,
            amount: self.cancel_amount,
            trace_id: Uuid::new_v4(),
            memo: OrderAction::Cancel { order: order_trace }.pack()?,
        };
        self.send(&request).await?;

        metrics::inc_orders_cancelled();
        debug!(cancel_trace = %request.trace_id, "Cancel sent");
        Ok(request.trace_id)
    }

    /// Trade `amount` of the give asset on the secondary venue.
    ///
    /// An ask sells base for quote, a bid spends quote on base. The amount is
    /// floored to the give asset's precision; the floored amount is returned.
    #[instrument(skip(self, pair), fields(pair = %pair))]
    pub async fn offset_secondary(
        &self,
        pair: &TradingPair,
        side: Side,
        amount: Decimal,
        trace_id: Uuid,
    ) -> Result<Decimal, TradingError> {
        if !self.enable_secondary {
            return Err(TradingError::VenueDisabled("secondary"));
        }

        let (give, get) = pair.give_get(side);
        let floored = self.floor_amount(&give, amount);
        if floored <= Decimal::ZERO {
            return Err(TradingError::InvalidParams(format!(
                "offset amount {} floors to zero",
                amount
            )));
        }

        let request = TransferRequest {
            asset_id: give,
            recipient_id: self.secondary_routing_id,
            amount: floored,
            trace_id,
            memo: OtcOrderAction { asset: get }.pack()?,
        };
        self.send(&request).await?;

        metrics::inc_offset_trades();
        info!(amount = %floored, "Secondary offset sent");
        Ok(floored)
    }

    /// Round `amount` of `asset` down to its configured precision.
    pub fn floor_amount(&self, asset: &Uuid, amount: Decimal) -> Decimal {
        let precision = self
            .asset_precisions
            .get_or(asset, self.default_asset_precision);
        amount.round_dp_with_strategy(precision, RoundingStrategy::ToZero)
    }

    fn random_broker(&self) -> Result<Uuid, TradingError> {
        self.brokers
            .choose(&mut rand::thread_rng())
            .copied()
            .ok_or_else(|| TradingError::InvalidParams("no primary brokers configured".to_string()))
    }

    async fn send(&self, request: &TransferRequest) -> Result<(), TradingError> {
        let _guard = self.locks.acquire(&request.recipient_id, &request.asset_id).await;

        match tokio::time::timeout(self.timeout, self.client.transfer(request)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => {
                warn!(trace_id = %request.trace_id, error = %source, "Transfer failed");
                Err(TradingError::TransferFailed {
                    trace_id: request.trace_id,
                    source,
                })
            }
            Err(_) => {
                warn!(trace_id = %request.trace_id, "Transfer timed out");
                Err(TradingError::Timeout {
                    millis: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}
