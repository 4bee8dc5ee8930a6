//! Attribution of settlement confirmations to tracked opportunities.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::types::SettlementConfirmation;
use crate::arbitrage::ArbitrageOpportunity;
use crate::config::Config;
use crate::error::SettlementError;
use crate::metrics;
use crate::protocol::{OtcReply, OtcReplyKind, TransferReply};
use crate::trading::SharedTradingState;

/// Confirmation ids remembered for deduplication.
pub const SEEN_CAPACITY: usize = 100_000;

/// What happened to one confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Skipped before decoding.
    Ignored(&'static str),
    /// Decoded but references nothing tracked.
    Unmatched,
    /// Amount added to an opportunity.
    Matched {
        /// Opportunity credited.
        opportunity_id: Uuid,
    },
}

/// Bounded insertion-ordered set.
#[derive(Debug)]
struct SeenSet {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenSet {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity.min(1024)),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: &str) {
        if !self.ids.insert(id.to_string()) {
            return;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

/// Matches confirmations against the shared trading state.
#[derive(Debug)]
pub struct SettlementReconciler {
    state: SharedTradingState,
    client_id: Uuid,
    secondary_routing_id: Uuid,
    cancel_asset_id: Uuid,
    seen: Mutex<SeenSet>,
}

impl SettlementReconciler {
    /// Create a reconciler over `state`.
    pub fn new(config: &Config, state: SharedTradingState) -> Self {
        Self::with_capacity(config, state, SEEN_CAPACITY)
    }

    /// Create a reconciler remembering at most `capacity` confirmation ids.
    pub fn with_capacity(config: &Config, state: SharedTradingState, capacity: usize) -> Self {
        Self {
            state,
            client_id: config.client_id,
            secondary_routing_id: config.secondary_routing_id,
            cancel_asset_id: config.cancel_asset_id,
            seen: Mutex::new(SeenSet::new(capacity)),
        }
    }

    /// Process one confirmation.
    ///
    /// A memo that fails to decode is returned as an error and the
    /// confirmation is not remembered, so a later delivery is processed again.
    /// Outbound transfers carry the engine's own action memo and are matched
    /// by trace id alone.
    #[instrument(skip(self, confirmation), fields(confirmation_id = %confirmation.id, asset = %confirmation.asset_id))]
    pub fn on_confirmation(
        &self,
        confirmation: &SettlementConfirmation,
    ) -> Result<Reconciliation, SettlementError> {
        let Some(counterparty) = confirmation.counterparty_id else {
            return Ok(self.ignore(None, "no_counterparty"));
        };
        if self.seen.lock().contains(&confirmation.id) {
            return Ok(self.ignore(None, "duplicate"));
        }
        if counterparty == self.client_id {
            return Ok(self.ignore(Some(&confirmation.id), "self_transfer"));
        }
        if confirmation.asset_id == self.cancel_asset_id {
            return Ok(self.ignore(Some(&confirmation.id), "cancel_asset"));
        }

        let outbound = confirmation.amount.is_sign_negative();
        let (mut references, reply) = if outbound {
            (Vec::new(), None)
        } else {
            self.decode(confirmation, counterparty).map_err(|e| {
                metrics::inc_memo_decode_errors();
                error!(
                    confirmation_id = %confirmation.id,
                    counterparty = %counterparty,
                    trace_id = ?confirmation.trace_id,
                    error = %e,
                    "Settlement memo could not be decoded"
                );
                e
            })?
        };
        references.extend(confirmation.trace_id);

        let asset = confirmation.asset_id;
        let outcome = {
            let mut state = self.state.lock();
            match state.find_mut(&references) {
                Some(record) if record.pair.base == asset || record.pair.quote == asset => {
                    let own_offset = outbound && confirmation.trace_id.map_or(false, |t| record.is_offset(&t));
                    // Offsets are debited when sent.
                    if !own_offset {
                        record.attribute(&asset, confirmation.amount);
                    }
                    if let Some(reply) = &reply {
                        Self::settle_reply(record, reply);
                    }
                    info!(
                        opportunity_id = %record.id,
                        pair = %record.pair,
                        trace_id = %record.primary_trace,
                        amount = %confirmation.amount,
                        base_amount = %record.base_amount,
                        quote_amount = %record.quote_amount,
                        "Confirmation matched"
                    );
                    Reconciliation::Matched {
                        opportunity_id: record.id,
                    }
                }
                Some(record) => {
                    debug!(opportunity_id = %record.id, "Confirmation asset outside pair");
                    Reconciliation::Unmatched
                }
                None => {
                    if let Some(OtcReply {
                        kind: Some(kind @ (OtcReplyKind::Refund | OtcReplyKind::Error)),
                        order,
                        ..
                    }) = &reply
                    {
                        error!(
                            confirmation_id = %confirmation.id,
                            trace_id = ?order,
                            asset = %asset,
                            amount = %confirmation.amount,
                            kind = ?kind,
                            "Counterparty refund matched no open opportunity, offset manually"
                        );
                    }
                    Reconciliation::Unmatched
                }
            }
        };

        if matches!(outcome, Reconciliation::Matched { .. }) {
            metrics::inc_confirmations_matched();
        }
        self.seen.lock().insert(&confirmation.id);
        Ok(outcome)
    }

    /// Clear the record's wait on its offset. A refund or error has already
    /// been credited back to the residual, so the sweep offsets it again.
    fn settle_reply(record: &mut ArbitrageOpportunity, reply: &OtcReply) {
        let Some(order) = reply.order else {
            return;
        };
        if !record.observe_reply(&order) {
            return;
        }
        match reply.kind {
            Some(OtcReplyKind::Return) => debug!(opportunity_id = %record.id, trace_id = %order, "Offset filled"),
            kind => warn!(
                pair = %record.pair,
                opportunity_id = %record.id,
                trace_id = %order,
                kind = ?kind,
                code = reply.code,
                residual = %record.residual(),
                "Offset not filled by counterparty, residual reopened"
            ),
        }
    }

    /// Order references carried by the memo, and the counterparty reply if
    /// the sender is the secondary venue. Venue cancel replies also settle the registry.
    fn decode(
        &self,
        confirmation: &SettlementConfirmation,
        counterparty: Uuid,
    ) -> Result<(Vec<Uuid>, Option<OtcReply>), SettlementError> {
        if confirmation.memo.is_empty() {
            return Ok((Vec::new(), None));
        }
        let malformed = |source| SettlementError::MalformedMemo {
            confirmation_id: confirmation.id.clone(),
            source,
        };

        if counterparty == self.secondary_routing_id {
            let reply = OtcReply::unpack(&confirmation.memo).map_err(malformed)?;
            return Ok((reply.order.into_iter().collect(), Some(reply)));
        }

        let reply = TransferReply::unpack(&confirmation.memo).map_err(malformed)?;
        if let Some(cancelled) = reply.cancelled_order {
            self.state.lock().mark_observed(&cancelled);
        }
        Ok((reply.references().collect(), None))
    }

    fn ignore(&self, id: Option<&str>, reason: &'static str) -> Reconciliation {
        metrics::inc_confirmations_ignored(reason);
        if let Some(id) = id {
            self.seen.lock().insert(id);
        }
        debug!(reason, "Confirmation ignored");
        Reconciliation::Ignored(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use time::OffsetDateTime;

    use tokio::time::Instant;

    use crate::config::tests::test_config;
    use crate::market::{QuoteLevel, Side};
    use crate::protocol::OtcOrderAction;
    use crate::trading::TradingState;

    fn setup() -> (SettlementReconciler, SharedTradingState, ArbitrageOpportunity) {
        let config = test_config();
        let state = TradingState::shared();
        let opportunity = ArbitrageOpportunity::new(
            config.client_id,
            0,
            config.watch_pairs[0],
            Side::Bid,
            dec!(100),
            dec!(10),
            &QuoteLevel {
                price: dec!(102),
                min_amount: dec!(1),
                max_amount: dec!(50),
            },
            dec!(0.02),
            Duration::from_secs(5),
        );
        {
            let mut guard = state.lock();
            guard.register(opportunity.primary_trace, false);
            guard.track(opportunity.clone());
        }
        (SettlementReconciler::new(&config, state.clone()), state, opportunity)
    }

    fn confirmation(id: &str, asset: Uuid, amount: Decimal, counterparty: Uuid, memo: String) -> SettlementConfirmation {
        SettlementConfirmation {
            id: id.to_string(),
            amount,
            asset_id: asset,
            counterparty_id: Some(counterparty),
            trace_id: None,
            memo,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn broker() -> Uuid {
        test_config().primary_broker_ids[0]
    }

    #[test]
    fn matched_fill_credits_base() {
        let (reconciler, state, opp) = setup();
        let memo = TransferReply {
            matched_bid: Some(opp.primary_trace),
            ..Default::default()
        }
        .pack()
        .unwrap();

        let outcome = reconciler
            .on_confirmation(&confirmation("c1", opp.pair.base, dec!(10), broker(), memo))
            .unwrap();

        assert_eq!(outcome, Reconciliation::Matched { opportunity_id: opp.id });
        assert_eq!(state.lock().tracked[&opp.id].base_amount, dec!(10));
    }

    #[test]
    fn ignores_before_decoding() {
        let (reconciler, state, opp) = setup();
        let config = test_config();

        let mut anonymous = confirmation("c0", opp.pair.base, dec!(1), broker(), String::new());
        anonymous.counterparty_id = None;
        assert_eq!(reconciler.on_confirmation(&anonymous).unwrap(), Reconciliation::Ignored("no_counterparty"));

        let own = confirmation("c1", opp.pair.base, dec!(1), config.client_id, "garbage".to_string());
        assert_eq!(reconciler.on_confirmation(&own).unwrap(), Reconciliation::Ignored("self_transfer"));

        let dust = confirmation("c2", config.cancel_asset_id, dec!(-0.00000001), broker(), "garbage".to_string());
        assert_eq!(reconciler.on_confirmation(&dust).unwrap(), Reconciliation::Ignored("cancel_asset"));

        assert_eq!(state.lock().tracked[&opp.id].base_amount, Decimal::ZERO);
    }

    #[test]
    fn duplicate_confirmation_counted_once() {
        let (reconciler, state, opp) = setup();
        let mut c = confirmation("dup", opp.pair.quote, dec!(-1000), broker(), String::new());
        c.trace_id = Some(opp.primary_trace);

        assert!(matches!(reconciler.on_confirmation(&c).unwrap(), Reconciliation::Matched { .. }));
        assert_eq!(reconciler.on_confirmation(&c).unwrap(), Reconciliation::Ignored("duplicate"));
        assert_eq!(state.lock().tracked[&opp.id].quote_amount, dec!(-1000));
    }

    #[test]
    fn malformed_memo_is_an_error_and_not_remembered() {
        let (reconciler, state, opp) = setup();
        let c = confirmation("bad", opp.pair.base, dec!(1), broker(), "!!not-base64!!".to_string());

        let err = reconciler.on_confirmation(&c).unwrap_err();
        assert!(matches!(err, SettlementError::MalformedMemo { ref confirmation_id, .. } if confirmation_id == "bad"));
        assert!(reconciler.on_confirmation(&c).is_err());
        assert_eq!(state.lock().tracked[&opp.id].base_amount, Decimal::ZERO);
    }

    fn otc_reply(kind: OtcReplyKind, order: Uuid) -> String {
        OtcReply {
            code: 1000,
            kind: Some(kind),
            order: Some(order),
            ..Default::default()
        }
        .pack()
        .unwrap()
    }

    /// Fill of 10 base, then an offset of all of it sent under `trace`.
    fn hedged(state: &SharedTradingState, opp: &ArbitrageOpportunity, trace: Uuid) {
        let mut guard = state.lock();
        let record = guard.tracked.get_mut(&opp.id).unwrap();
        record.attribute(&opp.pair.base, dec!(10));
        record.debit_offset(trace, dec!(10));
        record.await_reply(trace, Instant::now());
    }

    #[test]
    fn secondary_reply_matches_secondary_leg() {
        let (reconciler, state, opp) = setup();
        let secondary = Uuid::from_u128(0x5EC);
        hedged(&state, &opp, secondary);

        let memo = otc_reply(OtcReplyKind::Return, secondary);
        let c = confirmation("otc", opp.pair.quote, dec!(1019), test_config().secondary_routing_id, memo);

        assert!(matches!(reconciler.on_confirmation(&c).unwrap(), Reconciliation::Matched { .. }));
        let guard = state.lock();
        let record = &guard.tracked[&opp.id];
        assert_eq!(record.quote_amount, dec!(1019));
        assert_eq!(record.residual(), Decimal::ZERO);
        assert_eq!(record.awaiting_reply(), None);
    }

    #[test]
    fn own_offset_leg_is_not_debited_twice() {
        let (reconciler, state, opp) = setup();
        let secondary = Uuid::from_u128(0x5EC);
        hedged(&state, &opp, secondary);

        let memo = OtcOrderAction { asset: opp.pair.quote }.pack().unwrap();
        let mut c = confirmation("out", opp.pair.base, dec!(-10), test_config().secondary_routing_id, memo);
        c.trace_id = Some(secondary);

        assert!(matches!(reconciler.on_confirmation(&c).unwrap(), Reconciliation::Matched { .. }));
        let guard = state.lock();
        assert_eq!(guard.tracked[&opp.id].base_amount, Decimal::ZERO);
        assert_eq!(guard.tracked[&opp.id].awaiting_reply(), Some(secondary));
    }

    #[test]
    fn refunded_offset_reopens_residual() {
        let (reconciler, state, opp) = setup();
        let secondary = Uuid::from_u128(0x5EC);
        hedged(&state, &opp, secondary);

        let memo = otc_reply(OtcReplyKind::Refund, secondary);
        let c = confirmation("refund", opp.pair.base, dec!(10), test_config().secondary_routing_id, memo);

        assert!(matches!(reconciler.on_confirmation(&c).unwrap(), Reconciliation::Matched { .. }));
        let guard = state.lock();
        assert_eq!(guard.tracked[&opp.id].residual(), dec!(10));
        assert_eq!(guard.tracked[&opp.id].awaiting_reply(), None);
    }

    #[test]
    fn refund_for_unknown_offset_is_unmatched() {
        let (reconciler, _, opp) = setup();
        let memo = otc_reply(OtcReplyKind::Error, Uuid::from_u128(0xBAD));
        let c = confirmation("stray", opp.pair.base, dec!(4), test_config().secondary_routing_id, memo);
        assert_eq!(reconciler.on_confirmation(&c).unwrap(), Reconciliation::Unmatched);
    }

    #[test]
    fn cancel_reply_marks_registry_observed() {
        let (reconciler, state, opp) = setup();
        let memo = TransferReply {
            cancelled_order: Some(opp.primary_trace),
            ..Default::default()
        }
        .pack()
        .unwrap();
        let c = confirmation("refund", opp.pair.quote, dec!(1000), broker(), memo);

        reconciler.on_confirmation(&c).unwrap();
        let guard = state.lock();
        assert!(guard.is_observed(&opp.primary_trace));
        assert_eq!(guard.tracked[&opp.id].quote_amount, dec!(1000));
    }

    #[test]
    fn unrelated_reference_is_unmatched() {
        let (reconciler, _, opp) = setup();
        let memo = TransferReply {
            matched_ask: Some(Uuid::from_u128(0xDEAD)),
            ..Default::default()
        }
        .pack()
        .unwrap();
        let c = confirmation("other", opp.pair.base, dec!(1), broker(), memo);
        assert_eq!(reconciler.on_confirmation(&c).unwrap(), Reconciliation::Unmatched);
    }

    #[test]
    fn seen_set_is_bounded() {
        let mut seen = SeenSet::new(2);
        seen.insert("a");
        seen.insert("b");
        seen.insert("a");
        seen.insert("c");
        assert!(!seen.contains("a"));
        assert!(seen.contains("b") && seen.contains("c"));
    }
}
