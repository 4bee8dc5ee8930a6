//! End-to-end tests for the arbitrage engine.
//!
//! The engine runs against in-memory settlement, balance and quote mocks;
//! book events and confirmations are pushed through the engine boundary.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::OffsetDateTime;
use uuid::Uuid;

use cross_arb::arbitrage::OpportunityStatus;
use cross_arb::audit::{AuditEvent, MemoryAuditSink};
use cross_arb::config::Config;
use cross_arb::market::{MockBalanceSource, MockDepthProvider, Side, TradingPair};
use cross_arb::orderbook::{BookEvent, BookEventKind, LevelChange, PriceLevel};
use cross_arb::protocol::{OrderAction, OrderType, OtcReply, OtcReplyKind, PlaceOrder, TransferReply};
use cross_arb::settlement::{MockSettlementClient, Reconciliation, SettlementConfirmation, TransferRequest};
use cross_arb::Engine;

const BASE: u128 = 0xA;
const QUOTE: u128 = 0xB;
const BROKER: u128 = 0xB1;
const OTC: u128 = 0x07C;

fn pair() -> TradingPair {
    TradingPair::new(Uuid::from_u128(BASE), Uuid::from_u128(QUOTE))
}

fn config() -> Config {
    let vars = [
        ("CLIENT_ID", Uuid::from_u128(0xC1).to_string()),
        ("PRIMARY_BROKER_IDS", Uuid::from_u128(BROKER).to_string()),
        ("SECONDARY_ROUTING_ID", Uuid::from_u128(OTC).to_string()),
        ("CANCEL_ASSET_ID", Uuid::from_u128(0xCA).to_string()),
        ("WATCH_PAIRS", pair().market_id()),
        ("TICK_INTERVAL_MS", "10".to_string()),
        ("SWEEP_INTERVAL_MS", "10".to_string()),
        ("CONFIRMATION_POLL_MS", "10".to_string()),
        ("FISHING_ENABLED", "false".to_string()),
    ];
    envy::from_iter(vars.into_iter().map(|(k, v)| (k.to_string(), v))).expect("test config parses")
}

struct Harness {
    engine: Engine,
    client: MockSettlementClient,
    audit: MemoryAuditSink,
}

fn harness() -> Harness {
    let config = config();
    config.validate().expect("test config is valid");

    let client = MockSettlementClient::new();
    let balances = MockBalanceSource::new();
    balances.set_balance(pair().base, dec!(1000));
    balances.set_balance(pair().quote, dec!(100000));
    let quotes = MockDepthProvider::new();
    quotes.set_prices(pair(), dec!(102), dec!(104), dec!(0.1), dec!(5));
    let audit = MemoryAuditSink::new();

    let engine = Engine::new(
        config,
        Arc::new(client.clone()),
        Arc::new(balances),
        Arc::new(quotes),
        Arc::new(audit.clone()),
    );
    engine.balances().set(pair().base, dec!(1000));
    engine.balances().set(pair().quote, dec!(100000));

    Harness { engine, client, audit }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

fn confirmation(amount: Decimal, asset: u128, trace_id: Option<Uuid>, memo: String) -> SettlementConfirmation {
    SettlementConfirmation {
        id: Uuid::new_v4().to_string(),
        amount,
        asset_id: Uuid::from_u128(asset),
        counterparty_id: Some(Uuid::from_u128(BROKER)),
        trace_id,
        memo,
        created_at: OffsetDateTime::now_utc(),
    }
}

fn to_secondary(transfers: &[TransferRequest]) -> Vec<TransferRequest> {
    transfers
        .iter()
        .filter(|t| t.recipient_id == Uuid::from_u128(OTC))
        .cloned()
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buy_on_primary_is_offset_after_fill() {
    let h = harness();
    h.engine.start(pair()).unwrap();

    // Primary ask 100 against a counterparty bid of 102.
    h.engine
        .on_book_event(BookEvent::reset(
            pair().market_id(),
            1,
            vec![],
            vec![PriceLevel::new(dec!(100), dec!(3), dec!(300))],
        ))
        .await
        .unwrap();

    let audit = h.audit.clone();
    wait_for(|| !audit.events(AuditEvent::Created).is_empty()).await;
    let placed = h.client.transfers()[0].clone();
    assert_eq!(placed.asset_id, pair().quote);
    assert_eq!(placed.amount, dec!(300));
    match OrderAction::unpack(&placed.memo).unwrap() {
        OrderAction::Place(order) => {
            assert_eq!(order.side, Side::Bid);
            assert_eq!(order.asset, pair().base);
            assert_eq!(order.price, dec!(100));
        }
        other => panic!("expected a place action, got {:?}", other),
    }

    let created = h.audit.events(AuditEvent::Created);
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].amount, dec!(3));
    assert!(created[0].profit > dec!(0.019));

    // Our own outbound leg, then the fill.
    let outbound = confirmation(dec!(-300), QUOTE, Some(placed.trace_id), String::new());
    let fill_memo = TransferReply {
        matched_bid: Some(placed.trace_id),
        ..Default::default()
    }
    .pack()
    .unwrap();
    let fill = confirmation(dec!(3), BASE, None, fill_memo);

    let opportunity_id = created[0].id;
    assert_eq!(
        h.engine.on_settlement_confirmation(&outbound).unwrap(),
        Reconciliation::Matched { opportunity_id }
    );
    assert_eq!(
        h.engine.on_settlement_confirmation(&fill).unwrap(),
        Reconciliation::Matched { opportunity_id }
    );
    assert_eq!(
        h.engine.on_settlement_confirmation(&fill).unwrap(),
        Reconciliation::Ignored("duplicate")
    );

    let client = h.client.clone();
    wait_for(|| !to_secondary(&client.transfers()).is_empty()).await;
    let offset = to_secondary(&h.client.transfers())[0].clone();
    assert_eq!(offset.asset_id, pair().base);
    assert_eq!(offset.amount, dec!(3));

    // The offset leg leaving us, then the counterparty's proceeds.
    let mut sent = confirmation(dec!(-3), BASE, Some(offset.trace_id), offset.memo.clone());
    sent.counterparty_id = Some(Uuid::from_u128(OTC));
    let proceeds_memo = OtcReply {
        code: 1000,
        kind: Some(OtcReplyKind::Return),
        order: Some(offset.trace_id),
        ..Default::default()
    }
    .pack()
    .unwrap();
    let mut proceeds = confirmation(dec!(306), QUOTE, None, proceeds_memo);
    proceeds.counterparty_id = Some(Uuid::from_u128(OTC));
    assert!(h.audit.events(AuditEvent::Settled).is_empty());
    assert_eq!(
        h.engine.on_settlement_confirmation(&sent).unwrap(),
        Reconciliation::Matched { opportunity_id }
    );
    assert_eq!(
        h.engine.on_settlement_confirmation(&proceeds).unwrap(),
        Reconciliation::Matched { opportunity_id }
    );

    let audit = h.audit.clone();
    wait_for(|| !audit.events(AuditEvent::Settled).is_empty()).await;
    let settled = h.audit.events(AuditEvent::Settled);
    assert_eq!(settled[0].status, OpportunityStatus::Success);
    assert_eq!(settled[0].secondary_trace, Some(offset.trace_id));
    assert_eq!(settled[0].base_amount, Decimal::ZERO);
    assert_eq!(settled[0].quote_amount, dec!(6));

    // The settled order needs no cancel on shutdown.
    assert_eq!(h.engine.stop().await, 0);
    assert_eq!(h.client.transfers().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_cancels_open_primary_orders() {
    let h = harness();
    h.engine.start(pair()).unwrap();
    h.engine
        .on_book_event(BookEvent::reset(
            pair().market_id(),
            1,
            vec![],
            vec![PriceLevel::new(dec!(100), dec!(2), dec!(200))],
        ))
        .await
        .unwrap();

    let client = h.client.clone();
    wait_for(|| !client.transfers().is_empty()).await;
    let placed = h.client.transfers()[0].clone();

    assert_eq!(h.engine.stop().await, 1);
    let cancels: Vec<_> = h
        .client
        .transfers()
        .into_iter()
        .filter_map(|t| match OrderAction::unpack(&t.memo) {
            Ok(OrderAction::Cancel { order }) => Some(order),
            _ => None,
        })
        .collect();
    assert!(cancels.contains(&placed.trace_id));
    assert_eq!(h.audit.events(AuditEvent::Shutdown).len(), 1);

    assert_eq!(h.engine.stop().await, 0);
    assert!(h.engine.start(pair()).is_err());
}

#[tokio::test]
async fn sequence_gap_clears_the_book() {
    let h = harness();
    h.engine.start(pair()).unwrap();
    let market = pair().market_id();

    h.engine
        .on_book_event(BookEvent::reset(
            market.clone(),
            1,
            vec![PriceLevel::new(dec!(90), dec!(1), dec!(90))],
            vec![],
        ))
        .await
        .unwrap();
    for sequence in [2, 3] {
        let change = LevelChange {
            side: Side::Bid,
            price: dec!(89),
            amount: dec!(1),
            funds: None,
        };
        h.engine
            .on_book_event(BookEvent::change(market.clone(), BookEventKind::Open, sequence, change))
            .await
            .unwrap();
    }

    let change = LevelChange {
        side: Side::Bid,
        price: dec!(88),
        amount: dec!(1),
        funds: None,
    };
    assert!(h
        .engine
        .on_book_event(BookEvent::change(market, BookEventKind::Open, 5, change))
        .await
        .is_err());

    let snapshot = h.engine.book_handle(&pair()).unwrap().snapshot();
    assert!(snapshot.needs_resync);
    assert!(snapshot.depth.is_empty());

    h.engine.stop().await;
}

#[tokio::test]
async fn unknown_market_is_rejected() {
    let h = harness();
    h.engine.start(pair()).unwrap();
    h.engine.start(pair()).unwrap();

    let other = TradingPair::new(Uuid::from_u128(0xD), Uuid::from_u128(QUOTE));
    let event = BookEvent::reset(other.market_id(), 1, vec![], vec![]);
    assert!(h.engine.on_book_event(event).await.is_err());

    h.engine.stop().await;
}

#[test]
fn place_and_cancel_memos_decode_by_shape() {
    let place = OrderAction::Place(PlaceOrder {
        side: Side::Ask,
        asset: pair().quote,
        price: dec!(101.25),
        order_type: OrderType::Limit,
    });
    assert_eq!(OrderAction::unpack(&place.pack().unwrap()).unwrap(), place);

    let cancel = OrderAction::Cancel {
        order: Uuid::from_u128(42),
    };
    assert_eq!(OrderAction::unpack(&cancel.pack().unwrap()).unwrap(), cancel);
}
