//! Primary-venue order actions and the replies attached to their confirmations.
//!
//! On the wire both are compact msgpack maps with single-letter keys. An action
//! is sent as a tagged [`OrderAction`] and decoded by shape: a lone `O` is a
//! cancel, `S`/`A`/`P`/`T` together are a place, anything else is rejected.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::memo::{self, non_empty, WireUuid};
use crate::error::ProtocolError;
use crate::market::Side;

/// Primary-venue order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    /// Limit order at a fixed price.
    Limit,
    /// Market order, price must be zero.
    Market,
}

impl OrderType {
    /// Wire code.
    pub fn code(&self) -> &'static str {
        match self {
            OrderType::Limit => "L",
            OrderType::Market => "M",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "L" => Some(OrderType::Limit),
            "M" => Some(OrderType::Market),
            _ => None,
        }
    }
}

/// Place-order request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOrder {
    /// Order side.
    pub side: Side,
    /// Asset received when the order fills.
    pub asset: Uuid,
    /// Limit price; zero for market orders.
    pub price: Decimal,
    /// Order type.
    pub order_type: OrderType,
}

/// Outbound memo attached to a primary-venue transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderAction {
    /// Place a new order funded by the transfer.
    Place(PlaceOrder),
    /// Cancel the order created by the transfer with this trace id.
    Cancel {
        /// Trace id of the order to cancel.
        order: Uuid,
    },
}

impl OrderAction {
    /// Encode as a base64 memo.
    pub fn pack(&self) -> Result<String, ProtocolError> {
        memo::pack(&RawOrderAction::from(self))
    }

    /// Decode from a base64 memo.
    pub fn unpack(encoded: &str) -> Result<Self, ProtocolError> {
        memo::unpack::<RawOrderAction>(encoded)?.try_into()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawOrderAction {
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    side: Option<String>,
    #[serde(rename = "A", default, skip_serializing_if = "Option::is_none")]
    asset: Option<WireUuid>,
    #[serde(rename = "P", default, skip_serializing_if = "Option::is_none")]
    price: Option<String>,
    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    order_type: Option<String>,
    #[serde(rename = "O", default, skip_serializing_if = "Option::is_none")]
    order: Option<WireUuid>,
}

impl From<&OrderAction> for RawOrderAction {
    fn from(action: &OrderAction) -> Self {
        match action {
            OrderAction::Place(place) => Self {
                side: Some(place.side.code().to_string()),
                asset: Some(WireUuid(place.asset)),
                price: Some(place.price.normalize().to_string()),
                order_type: Some(place.order_type.code().to_string()),
                order: None,
            },
            OrderAction::Cancel { order } => Self {
                order: Some(WireUuid(*order)),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<RawOrderAction> for OrderAction {
    type Error = ProtocolError;

    fn try_from(raw: RawOrderAction) -> Result<Self, Self::Error> {
        let order = raw.order.and_then(WireUuid::present);
        let side = non_empty(raw.side);
        let asset = raw.asset.and_then(WireUuid::present);
        let price = non_empty(raw.price);
        let order_type = non_empty(raw.order_type);

        match (order, side, asset, price, order_type) {
            (Some(order), None, None, None, None) => Ok(OrderAction::Cancel { order }),
            (None, Some(side), Some(asset), Some(price), Some(order_type)) => {
                let side = match side.as_str() {
                    "A" => Side::Ask,
                    "B" => Side::Bid,
                    other => return Err(ProtocolError::InvalidShape(format!("unknown side {:?}", other))),
                };
                let order_type = OrderType::from_code(&order_type).ok_or_else(|| {
                    ProtocolError::InvalidShape(format!("unknown order type {:?}", order_type))
                })?;
                let price = Decimal::from_str(&price)
                    .map_err(|e| ProtocolError::InvalidShape(format!("price {:?}: {}", price, e)))?;
                Ok(OrderAction::Place(PlaceOrder {
                    side,
                    asset,
                    price,
                    order_type,
                }))
            }
            (order, side, asset, price, order_type) => Err(ProtocolError::InvalidShape(format!(
                "order={} side={} asset={} price={} type={}",
                order.is_some(),
                side.is_some(),
                asset.is_some(),
                price.is_some(),
                order_type.is_some()
            ))),
        }
    }
}

/// Inbound memo on a primary-venue confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReply {
    /// Reply source tag.
    pub source: Option<String>,
    /// Order cancelled by this transfer.
    pub cancelled_order: Option<Uuid>,
    /// Ask order matched by this transfer.
    pub matched_ask: Option<Uuid>,
    /// Bid order matched by this transfer.
    pub matched_bid: Option<Uuid>,
}

impl TransferReply {
    /// Encode as a base64 memo.
    pub fn pack(&self) -> Result<String, ProtocolError> {
        memo::pack(&RawTransferReply {
            source: self.source.clone(),
            cancelled_order: self.cancelled_order.map(WireUuid),
            matched_ask: self.matched_ask.map(WireUuid),
            matched_bid: self.matched_bid.map(WireUuid),
        })
    }

    /// Decode from a base64 memo.
    pub fn unpack(encoded: &str) -> Result<Self, ProtocolError> {
        let raw: RawTransferReply = memo::unpack(encoded)?;
        Ok(Self {
            source: non_empty(raw.source),
            cancelled_order: raw.cancelled_order.and_then(WireUuid::present),
            matched_ask: raw.matched_ask.and_then(WireUuid::present),
            matched_bid: raw.matched_bid.and_then(WireUuid::present),
        })
    }

    /// Every order id this reply refers to.
    pub fn references(&self) -> impl Iterator<Item = Uuid> + '_ {
        [self.cancelled_order, self.matched_ask, self.matched_bid]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawTransferReply {
    #[serde(rename = "S", default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(rename = "O", default, skip_serializing_if = "Option::is_none")]
    cancelled_order: Option<WireUuid>,
    #[serde(rename = "A", default, skip_serializing_if = "Option::is_none")]
    matched_ask: Option<WireUuid>,
    #[serde(rename = "B", default, skip_serializing_if = "Option::is_none")]
    matched_bid: Option<WireUuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn place() -> OrderAction {
        OrderAction::Place(PlaceOrder {
            side: Side::Bid,
            asset: Uuid::from_u128(0xA55E7),
            price: dec!(101.12345678),
            order_type: OrderType::Limit,
        })
    }

    #[test]
    fn place_round_trips_field_for_field() {
        let action = place();
        let memo = action.pack().unwrap();
        assert!(STANDARD.decode(&memo).unwrap().len() <= memo::MAX_MEMO_BYTES);
        assert_eq!(OrderAction::unpack(&memo).unwrap(), action);
    }

    #[test]
    fn cancel_never_populates_place_fields() {
        let action = OrderAction::Cancel {
            order: Uuid::from_u128(42),
        };
        let memo = action.pack().unwrap();

        let raw: RawOrderAction = memo::unpack(&memo).unwrap();
        assert!(raw.side.is_none());
        assert!(raw.asset.is_none());
        assert!(raw.price.is_none());
        assert!(raw.order_type.is_none());

        assert_eq!(OrderAction::unpack(&memo).unwrap(), action);
    }

    #[test]
    fn mixed_shape_is_rejected() {
        let raw = RawOrderAction {
            side: Some("A".into()),
            order: Some(WireUuid(Uuid::from_u128(1))),
            ..Default::default()
        };
        let memo = memo::pack(&raw).unwrap();
        assert!(matches!(
            OrderAction::unpack(&memo),
            Err(ProtocolError::InvalidShape(_))
        ));
    }

    #[test]
    fn incomplete_place_is_rejected() {
        let raw = RawOrderAction {
            side: Some("A".into()),
            price: Some("1".into()),
            ..Default::default()
        };
        let memo = memo::pack(&raw).unwrap();
        assert!(matches!(
            OrderAction::unpack(&memo),
            Err(ProtocolError::InvalidShape(_))
        ));
    }

    #[test]
    fn reply_treats_nil_ids_as_absent() {
        let raw = RawTransferReply {
            source: Some("MATCH".into()),
            cancelled_order: Some(WireUuid(Uuid::nil())),
            matched_ask: Some(WireUuid(Uuid::from_u128(5))),
            matched_bid: None,
        };
        let reply = TransferReply::unpack(&memo::pack(&raw).unwrap()).unwrap();
        assert_eq!(reply.cancelled_order, None);
        assert_eq!(reply.references().collect::<Vec<_>>(), vec![Uuid::from_u128(5)]);
    }

    #[test]
    fn reply_round_trips() {
        let reply = TransferReply {
            source: Some("CANCEL".into()),
            cancelled_order: Some(Uuid::from_u128(9)),
            matched_ask: None,
            matched_bid: None,
        };
        assert_eq!(TransferReply::unpack(&reply.pack().unwrap()).unwrap(), reply);
    }
}
