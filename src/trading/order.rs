//! Primary-venue orders, their validation, and trace id derivation.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::error::TradingError;
use crate::market::{Side, TradingPair};
use crate::protocol::{OrderAction, OrderType, PlaceOrder};

/// Decimals kept on primary-venue prices.
pub const PRICE_PRECISION: u32 = 8;
/// Decimals kept on primary-venue amounts.
pub const AMOUNT_PRECISION: u32 = 4;
/// Highest accepted price.
pub const MAX_PRICE: Decimal = dec!(1000000000);
/// Highest accepted base amount.
pub const MAX_AMOUNT: Decimal = dec!(5000000000);
/// Highest accepted quote funds.
pub const MAX_FUNDS: Decimal = dec!(5000000000000000000);

/// Trace id of the primary leg of an opportunity.
pub fn primary_trace_id(opportunity_id: Uuid) -> Uuid {
    Uuid::new_v5(&opportunity_id, b"primary")
}

/// Trace id of the `attempt`-th secondary leg of an opportunity. A retry of
/// the same attempt reuses the trace, so the network settles it at most once.
pub fn secondary_trace_id(opportunity_id: Uuid, routing_id: Uuid, attempt: usize) -> Uuid {
    let mut name = routing_id.as_bytes().to_vec();
    name.extend_from_slice(&(attempt as u64).to_be_bytes());
    Uuid::new_v5(&opportunity_id, &name)
}

/// Trace id of a batched offset of `amount` covering `ids`.
pub fn batch_trace_id(ids: &[Uuid], amount: Decimal) -> Uuid {
    let mut joined: Vec<u8> = ids.iter().flat_map(|id| *id.as_bytes()).collect();
    joined.extend_from_slice(amount.normalize().to_string().as_bytes());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, &joined)
}

/// Order placed on the primary venue by transferring the give asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryOrder {
    /// Pair traded.
    pub pair: TradingPair,
    /// Ask sells base, bid buys base.
    pub side: Side,
    /// Limit or market.
    pub order_type: OrderType,
    /// Limit price, zero for market orders.
    pub price: Decimal,
    /// Amount of the give asset: base for asks, quote funds for bids.
    pub amount: Decimal,
    /// Idempotency key of the funding transfer.
    pub trace_id: Uuid,
}

impl PrimaryOrder {
    /// Limit order with price and amount rounded to venue precision.
    pub fn limit(pair: TradingPair, side: Side, price: Decimal, amount: Decimal, trace_id: Uuid) -> Self {
        Self {
            pair,
            side,
            order_type: OrderType::Limit,
            price: price.round_dp_with_strategy(PRICE_PRECISION, RoundingStrategy::MidpointAwayFromZero),
            amount: amount.round_dp_with_strategy(AMOUNT_PRECISION, RoundingStrategy::MidpointAwayFromZero),
            trace_id,
        }
    }

    /// Asset sent to the broker.
    pub fn give_asset(&self) -> Uuid {
        self.pair.give_get(self.side).0
    }

    /// Asset received on fill.
    pub fn get_asset(&self) -> Uuid {
        self.pair.give_get(self.side).1
    }

    /// Memo attached to the funding transfer.
    pub fn action(&self) -> OrderAction {
        OrderAction::Place(PlaceOrder {
            side: self.side,
            asset: self.get_asset(),
            price: self.price,
            order_type: self.order_type,
        })
    }

    /// Venue-side sanity checks; `quote_precision` and `quote_minimum` belong to the pair's quote asset.
    pub fn validate(&self, quote_precision: u32, quote_minimum: Decimal) -> Result<(), TradingError> {
        if self.price > MAX_PRICE {
            return Err(TradingError::InvalidParams(format!(
                "price {} exceeds {}",
                self.price, MAX_PRICE
            )));
        }

        let price = self
            .price
            .round_dp_with_strategy(quote_precision, RoundingStrategy::ToZero);
        match self.order_type {
            OrderType::Limit if price.is_zero() => {
                return Err(TradingError::InvalidParams(
                    "limit price must be non-zero".to_string(),
                ))
            }
            OrderType::Market if !price.is_zero() => {
                return Err(TradingError::InvalidParams(
                    "market price must be zero".to_string(),
                ))
            }
            _ => {}
        }

        match self.side {
            Side::Bid => {
                if self.amount > MAX_FUNDS {
                    return Err(TradingError::InvalidParams(format!(
                        "funds {} exceed {}",
                        self.amount, MAX_FUNDS
                    )));
                }
                if self.amount < quote_minimum {
                    return Err(TradingError::InvalidParams(format!(
                        "funds {} below minimum {}",
                        self.amount, quote_minimum
                    )));
                }
            }
            Side::Ask => {
                if self.amount > MAX_AMOUNT {
                    return Err(TradingError::InvalidParams(format!(
                        "amount {} exceeds {}",
                        self.amount, MAX_AMOUNT
                    )));
                }
                if self.order_type == OrderType::Limit && price * self.amount < quote_minimum {
                    return Err(TradingError::InvalidParams(format!(
                        "notional {} below minimum {}",
                        price * self.amount,
                        quote_minimum
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> TradingPair {
        TradingPair::new(Uuid::from_u128(0xBA5E), Uuid::from_u128(0x0007E))
    }

    #[test]
    fn limit_rounds_price_and_amount() {
        let order = PrimaryOrder::limit(pair(), Side::Ask, dec!(1.123456789), dec!(2.00005), Uuid::nil());
        assert_eq!(order.price, dec!(1.12345679));
        assert_eq!(order.amount, dec!(2.0001));
    }

    #[test]
    fn give_and_get_follow_side() {
        let ask = PrimaryOrder::limit(pair(), Side::Ask, dec!(1), dec!(1), Uuid::nil());
        assert_eq!(ask.give_asset(), pair().base);
        assert_eq!(ask.get_asset(), pair().quote);

        let bid = PrimaryOrder::limit(pair(), Side::Bid, dec!(1), dec!(1), Uuid::nil());
        assert_eq!(bid.give_asset(), pair().quote);
        match bid.action() {
            OrderAction::Place(place) => assert_eq!(place.asset, pair().base),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn validation_rules() {
        let ok = PrimaryOrder::limit(pair(), Side::Ask, dec!(100), dec!(1), Uuid::nil());
        assert!(ok.validate(4, dec!(1)).is_ok());

        let dust_price = PrimaryOrder::limit(pair(), Side::Ask, dec!(0.00001), dec!(1), Uuid::nil());
        assert!(dust_price.validate(4, dec!(0)).is_err());

        let small_notional = PrimaryOrder::limit(pair(), Side::Ask, dec!(0.5), dec!(1), Uuid::nil());
        assert!(small_notional.validate(4, dec!(1)).is_err());

        let small_funds = PrimaryOrder::limit(pair(), Side::Bid, dec!(100), dec!(0.5), Uuid::nil());
        assert!(small_funds.validate(4, dec!(1)).is_err());

        let too_pricey = PrimaryOrder::limit(pair(), Side::Bid, dec!(1000000001), dec!(5), Uuid::nil());
        assert!(too_pricey.validate(4, dec!(1)).is_err());

        let mut market = PrimaryOrder::limit(pair(), Side::Bid, dec!(1), dec!(5), Uuid::nil());
        market.order_type = OrderType::Market;
        assert!(market.validate(4, dec!(1)).is_err());
        market.price = Decimal::ZERO;
        assert!(market.validate(4, dec!(1)).is_ok());
    }

    #[test]
    fn trace_ids_are_deterministic_and_distinct() {
        let opp = Uuid::from_u128(99);
        let routing = Uuid::from_u128(7);
        assert_eq!(primary_trace_id(opp), primary_trace_id(opp));
        assert_ne!(primary_trace_id(opp), secondary_trace_id(opp, routing, 0));
        assert_eq!(secondary_trace_id(opp, routing, 1), secondary_trace_id(opp, routing, 1));
        assert_ne!(secondary_trace_id(opp, routing, 0), secondary_trace_id(opp, routing, 1));

        let ids = [Uuid::from_u128(1), Uuid::from_u128(2)];
        assert_eq!(batch_trace_id(&ids, dec!(5.0)), batch_trace_id(&ids, dec!(5)));
        assert_ne!(batch_trace_id(&ids, dec!(5)), batch_trace_id(&ids, dec!(4)));
        assert_ne!(
            batch_trace_id(&ids, dec!(5)),
            batch_trace_id(&[Uuid::from_u128(2), Uuid::from_u128(1)], dec!(5))
        );
    }
}
