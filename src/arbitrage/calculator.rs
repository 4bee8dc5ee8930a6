//! Profit math and the tracked opportunity record.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use crate::market::{QuoteLevel, Side, TradingPair};
use crate::trading::primary_trace_id;

/// Lifecycle of a tracked opportunity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityStatus {
    /// Primary order placed, waiting for fill or expiry.
    Pending,
    /// Fully reconciled.
    Success,
    /// Expired with a residual too small to offset.
    Failed,
    /// Offset later as part of a batch.
    Done,
}

impl OpportunityStatus {
    /// No further mutation is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Done)
    }
}

/// One detected price discrepancy and everything learned about it since.
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageOpportunity {
    /// Content hash of the detected condition.
    pub id: Uuid,
    /// Pair traded.
    pub pair: TradingPair,
    /// Side executed on the primary venue.
    pub category: Side,
    /// Primary-venue limit price.
    pub price: Decimal,
    /// Intended base amount.
    pub amount: Decimal,
    /// Counterparty minimum, in base.
    pub min_amount: Decimal,
    /// Counterparty maximum, in base.
    pub max_amount: Decimal,
    /// Profit ratio at detection.
    pub profit: Decimal,
    /// Wall-clock detection time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip)]
    pub(crate) created: Instant,
    /// Primary order lifetime in milliseconds.
    pub expire_ms: u64,
    /// Net base observed through confirmations.
    pub base_amount: Decimal,
    /// Net quote observed through confirmations.
    pub quote_amount: Decimal,
    /// Trace id of the primary leg.
    pub primary_trace: Uuid,
    /// Trace id of the latest secondary leg, once sent.
    pub secondary_trace: Option<Uuid>,
    /// Every offset trace sent for this record, oldest first.
    pub offset_traces: Vec<Uuid>,
    /// Current lifecycle state.
    pub status: OpportunityStatus,
    /// Synthesized from a trade print rather than a depth tick.
    pub fishing: bool,
    #[serde(skip)]
    pub(crate) settled: Option<Instant>,
    /// Offset trace waiting for the counterparty's reply, and when it was sent.
    #[serde(skip)]
    pub(crate) awaiting_reply: Option<(Uuid, Instant)>,
}

impl ArbitrageOpportunity {
    /// Build a pending opportunity. `salt` separates identical conditions seen by different engine runs.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_id: Uuid,
        salt: i64,
        pair: TradingPair,
        category: Side,
        price: Decimal,
        amount: Decimal,
        limits: &QuoteLevel,
        profit: Decimal,
        lifetime: Duration,
    ) -> Self {
        let id = opportunity_id(client_id, salt, &pair, category, price, amount);
        Self {
            id,
            pair,
            category,
            price,
            amount,
            min_amount: limits.min_amount,
            max_amount: limits.max_amount,
            profit,
            created_at: OffsetDateTime::now_utc(),
            created: Instant::now(),
            expire_ms: lifetime.as_millis() as u64,
            base_amount: Decimal::ZERO,
            quote_amount: Decimal::ZERO,
            primary_trace: primary_trace_id(id),
            secondary_trace: None,
            offset_traces: Vec::new(),
            status: OpportunityStatus::Pending,
            fishing: false,
            settled: None,
            awaiting_reply: None,
        }
    }

    /// Mark as a fishing opportunity.
    pub fn fishing(mut self) -> Self {
        self.fishing = true;
        self
    }

    /// When the primary order lifetime runs out.
    pub fn expires_at(&self) -> Instant {
        self.created + Duration::from_millis(self.expire_ms)
    }

    /// Past expiry plus the late-fill grace window.
    pub fn is_expired(&self, now: Instant, grace: Duration) -> bool {
        now >= self.expires_at() + grace
    }

    /// When the record entered its current terminal or failed state.
    pub fn settled_at(&self) -> Option<Instant> {
        self.settled
    }

    /// Move to `status`, stamping the transition time.
    pub fn transition(&mut self, status: OpportunityStatus, now: Instant) {
        self.status = status;
        self.settled = Some(now);
    }

    /// The primary leg received at least the intended amount net of the venue fee.
    pub fn primary_filled(&self, primary_fee: Decimal) -> bool {
        let keep = Decimal::ONE - primary_fee;
        match self.category {
            Side::Bid => self.base_amount >= self.amount * keep,
            Side::Ask => self.quote_amount >= self.amount * self.price * keep,
        }
    }

    /// Whether `reference` is one of this opportunity's trace ids.
    pub fn references(&self, reference: &Uuid) -> bool {
        self.primary_trace == *reference
            || self.secondary_trace.as_ref() == Some(reference)
            || self.offset_traces.contains(reference)
    }

    /// Side of the secondary trade that unwinds the primary fill.
    pub fn hedge_side(&self) -> Side {
        self.category.opposite()
    }

    /// Unhedged amount of the asset the hedge gives away: base after a primary
    /// buy, quote after a primary sell.
    pub fn residual(&self) -> Decimal {
        match self.category {
            Side::Bid => self.base_amount,
            Side::Ask => self.quote_amount,
        }
    }

    /// The accumulator the hedge receives into.
    pub fn counter_amount(&self) -> Decimal {
        match self.category {
            Side::Bid => self.quote_amount,
            Side::Ask => self.base_amount,
        }
    }

    /// At least one offset has been sent.
    pub fn has_offset(&self) -> bool {
        !self.offset_traces.is_empty()
    }

    /// Whether `trace` is one of this record's own offset transfers.
    pub fn is_offset(&self, trace: &Uuid) -> bool {
        self.offset_traces.contains(trace)
    }

    /// Debit `amount` of the residual for an offset sent under `trace`.
    pub fn debit_offset(&mut self, trace: Uuid, amount: Decimal) {
        match self.category {
            Side::Bid => self.base_amount -= amount,
            Side::Ask => self.quote_amount -= amount,
        }
        self.offset_traces.push(trace);
        self.secondary_trace = Some(trace);
    }

    /// Undo [`debit_offset`](Self::debit_offset) for a transfer that never went out.
    pub fn credit_offset(&mut self, trace: &Uuid, amount: Decimal) {
        if self.offset_traces.last() != Some(trace) {
            return;
        }
        match self.category {
            Side::Bid => self.base_amount += amount,
            Side::Ask => self.quote_amount += amount,
        }
        self.offset_traces.pop();
        self.secondary_trace = self.offset_traces.last().copied();
        if self.awaiting_reply.map(|(t, _)| t) == Some(*trace) {
            self.awaiting_reply = None;
        }
    }

    /// Wait for the counterparty's reply to `trace`.
    pub fn await_reply(&mut self, trace: Uuid, now: Instant) {
        self.awaiting_reply = Some((trace, now));
    }

    /// The offset trace still waiting for a reply.
    pub fn awaiting_reply(&self) -> Option<Uuid> {
        self.awaiting_reply.map(|(trace, _)| trace)
    }

    /// Waiting on a reply sent at least `timeout` before `now`.
    pub fn reply_overdue(&self, now: Instant, timeout: Duration) -> bool {
        self.awaiting_reply
            .map_or(false, |(_, sent)| now >= sent + timeout)
    }

    /// Clear the wait if `order` is the awaited offset. True when it was.
    pub fn observe_reply(&mut self, order: &Uuid) -> bool {
        if self.awaiting_reply() == Some(*order) {
            self.awaiting_reply = None;
            return true;
        }
        false
    }

    /// Add a signed confirmation amount to the accumulator of `asset`. False for foreign assets.
    pub fn attribute(&mut self, asset: &Uuid, amount: Decimal) -> bool {
        if *asset == self.pair.base {
            self.base_amount += amount;
            true
        } else if *asset == self.pair.quote {
            self.quote_amount += amount;
            true
        } else {
            false
        }
    }
}

/// Fee-adjusted break-even ratio: `raw / ((1 - primary) * (1 - secondary))`.
pub fn profit_threshold(raw_margin: Decimal, primary_fee: Decimal, secondary_fee: Decimal) -> Decimal {
    let keep = (Decimal::ONE - primary_fee) * (Decimal::ONE - secondary_fee);
    raw_margin.checked_div(keep).unwrap_or(Decimal::MAX)
}

/// Profit ratio of executing `category` on the primary venue at `primary_price`
/// and offsetting on the secondary venue at `secondary_price`.
///
/// Selling on the primary (`Ask`) earns `(primary - secondary) / secondary`.
/// Buying on the primary (`Bid`) earns the same ratio with the sign flipped.
pub fn profit_ratio(category: Side, primary_price: Decimal, secondary_price: Decimal) -> Option<Decimal> {
    let ratio = (primary_price - secondary_price).checked_div(secondary_price)?;
    Some(match category {
        Side::Ask => ratio,
        Side::Bid => -ratio,
    })
}

/// Strictly above the threshold.
pub fn qualifies(profit: Decimal, threshold: Decimal) -> bool {
    profit > threshold
}

/// Fit a detected amount into the counterparty's limits. `None` drops the opportunity.
pub fn clamp_amount(amount: Decimal, min: Decimal, max: Decimal) -> Option<Decimal> {
    if amount < min {
        return None;
    }
    let clamped = amount.min(max);
    (clamped > Decimal::ZERO).then_some(clamped)
}

/// Offset size bounded by counterparty limits and the balance on hand. Zero when below the minimum.
pub fn limit_amount(amount: Decimal, balance: Decimal, min: Decimal, max: Decimal) -> Decimal {
    if amount < min {
        return Decimal::ZERO;
    }
    amount.min(max).min(balance)
}

/// Deterministic id of a detected condition.
pub fn opportunity_id(
    client_id: Uuid,
    salt: i64,
    pair: &TradingPair,
    category: Side,
    price: Decimal,
    amount: Decimal,
) -> Uuid {
    let name = format!(
        "{}|{}|{}|{}|{}",
        salt,
        price.normalize(),
        amount.normalize(),
        category.code(),
        pair
    );
    Uuid::new_v5(&client_id, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn pair() -> TradingPair {
        TradingPair::new(Uuid::from_u128(0xA), Uuid::from_u128(0xB))
    }

    fn limits() -> QuoteLevel {
        QuoteLevel {
            price: dec!(102),
            min_amount: dec!(1),
            max_amount: dec!(50),
        }
    }

    fn opportunity(category: Side) -> ArbitrageOpportunity {
        ArbitrageOpportunity::new(
            Uuid::from_u128(0xC1),
            0,
            pair(),
            category,
            dec!(100),
            dec!(10),
            &limits(),
            dec!(0.02),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn threshold_boundary() {
        let threshold = profit_threshold(dec!(0.010), dec!(0.001), dec!(0.003));
        assert!(!qualifies(threshold, threshold));
        let epsilon = Decimal::new(1, threshold.scale());
        assert!(qualifies(threshold + epsilon, threshold));
        assert!(!qualifies(threshold - epsilon, threshold));
    }

    #[test]
    fn profit_direction() {
        // Buy at 100 on the primary, sell at 102 to the counterparty.
        let bid = profit_ratio(Side::Bid, dec!(100), dec!(102)).unwrap();
        assert!(bid > dec!(0.0196) && bid < dec!(0.0197));

        // Sell at 103 on the primary, buy at 100 from the counterparty.
        assert_eq!(profit_ratio(Side::Ask, dec!(103), dec!(100)), Some(dec!(0.03)));

        assert_eq!(profit_ratio(Side::Ask, dec!(1), Decimal::ZERO), None);
    }

    #[test]
    fn clamp_and_limit() {
        assert_eq!(clamp_amount(dec!(0.5), dec!(1), dec!(50)), None);
        assert_eq!(clamp_amount(dec!(80), dec!(1), dec!(50)), Some(dec!(50)));
        assert_eq!(clamp_amount(dec!(5), dec!(0), dec!(0)), None);

        assert_eq!(limit_amount(dec!(4), dec!(100), dec!(5), dec!(50)), Decimal::ZERO);
        assert_eq!(limit_amount(dec!(5), dec!(100), dec!(5), dec!(50)), dec!(5));
        assert_eq!(limit_amount(dec!(80), dec!(30), dec!(5), dec!(50)), dec!(30));
        assert_eq!(limit_amount(dec!(80), dec!(100), dec!(5), dec!(50)), dec!(50));
    }

    #[test]
    fn id_is_content_addressed() {
        let a = opportunity_id(Uuid::nil(), 1, &pair(), Side::Bid, dec!(100.0), dec!(2));
        let b = opportunity_id(Uuid::nil(), 1, &pair(), Side::Bid, dec!(100), dec!(2.00));
        assert_eq!(a, b);
        assert_ne!(a, opportunity_id(Uuid::nil(), 2, &pair(), Side::Bid, dec!(100), dec!(2)));
        assert_ne!(a, opportunity_id(Uuid::nil(), 1, &pair(), Side::Ask, dec!(100), dec!(2)));
    }

    #[test]
    fn fill_detection_per_side() {
        let mut bid = opportunity(Side::Bid);
        assert!(!bid.primary_filled(dec!(0.001)));
        assert!(bid.attribute(&pair().base, dec!(9.99)));
        assert!(bid.primary_filled(dec!(0.001)));

        let mut ask = opportunity(Side::Ask);
        ask.attribute(&pair().quote, dec!(998));
        assert!(!ask.primary_filled(dec!(0.001)));
        ask.attribute(&pair().quote, dec!(1));
        assert!(ask.primary_filled(dec!(0.001)));

        assert!(!ask.attribute(&Uuid::from_u128(0xFF), dec!(1)));
    }

    #[test]
    fn references_both_legs() {
        let mut opp = opportunity(Side::Bid);
        assert!(opp.references(&primary_trace_id(opp.id)));
        let secondary = Uuid::from_u128(42);
        assert!(!opp.references(&secondary));
        opp.secondary_trace = Some(secondary);
        assert!(opp.references(&secondary));
    }

    #[tokio::test(start_paused = true)]
    async fn offset_debits_the_hedged_leg() {
        let mut bid = opportunity(Side::Bid);
        bid.attribute(&pair().base, dec!(10));
        bid.attribute(&pair().quote, dec!(-1000));
        assert_eq!(bid.hedge_side(), Side::Ask);
        assert_eq!(bid.residual(), dec!(10));

        let first = Uuid::from_u128(1);
        bid.debit_offset(first, dec!(3));
        bid.await_reply(first, Instant::now());
        assert_eq!(bid.residual(), dec!(7));
        assert_eq!(bid.counter_amount(), dec!(-1000));
        assert!(bid.references(&first) && bid.is_offset(&first));

        let second = Uuid::from_u128(2);
        bid.debit_offset(second, dec!(7));
        bid.credit_offset(&second, dec!(7));
        assert_eq!(bid.residual(), dec!(7));
        assert_eq!(bid.secondary_trace, Some(first));
        assert_eq!(bid.awaiting_reply(), Some(first));

        assert!(!bid.reply_overdue(Instant::now(), Duration::from_secs(1)));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bid.reply_overdue(Instant::now(), Duration::from_secs(1)));
        assert!(!bid.observe_reply(&second));
        assert!(bid.observe_reply(&first));
        assert_eq!(bid.awaiting_reply(), None);

        let ask = opportunity(Side::Ask);
        assert_eq!(ask.hedge_side(), Side::Bid);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_includes_grace() {
        let opp = opportunity(Side::Ask);
        let grace = Duration::from_secs(3);
        assert!(!opp.is_expired(Instant::now(), grace));
        tokio::time::advance(Duration::from_millis(7_999)).await;
        assert!(!opp.is_expired(Instant::now(), grace));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(opp.is_expired(Instant::now(), grace));
    }

    #[test]
    fn audit_record_serializes() {
        let json = serde_json::to_value(opportunity(Side::Bid)).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["category"], "BID");
        assert!(json.get("created").is_none());
    }
}
