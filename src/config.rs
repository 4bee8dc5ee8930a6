//! Engine configuration loaded from environment variables.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::market::{AssetTable, TradingPair};

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Settlement Identity ===
    /// Operator's own settlement identity; transfers from it are ignored.
    pub client_id: Uuid,

    /// Settlement network API base URL.
    #[serde(default = "default_settlement_api_url")]
    pub settlement_api_url: String,

    /// Bearer token for the settlement API.
    #[serde(default)]
    pub settlement_access_token: String,

    // === Routing ===
    /// Primary-venue broker identities; one is picked per transfer.
    pub primary_broker_ids: Vec<Uuid>,

    /// Secondary-venue (OTC) routing identity.
    pub secondary_routing_id: Uuid,

    /// Asset used for the dust transfer carrying a cancel memo.
    pub cancel_asset_id: Uuid,

    /// Amount of the cancel dust transfer.
    #[serde(default = "default_cancel_amount")]
    pub cancel_amount: Decimal,

    // === Markets ===
    /// Pairs to watch, as `BASE-QUOTE` market ids.
    pub watch_pairs: Vec<TradingPair>,

    /// Book-diff feed websocket URL.
    #[serde(default = "default_book_ws_url")]
    pub book_ws_url: String,

    /// Counterparty quote API base URL.
    #[serde(default = "default_quote_api_url")]
    pub quote_api_url: String,

    // === Profit Parameters ===
    /// Required margin before fees (e.g., 0.010).
    #[serde(default = "default_raw_margin")]
    pub raw_margin: Decimal,

    /// Primary-venue fee rate.
    #[serde(default = "default_primary_fee")]
    pub primary_fee: Decimal,

    /// Secondary-venue fee rate.
    #[serde(default = "default_secondary_fee")]
    pub secondary_fee: Decimal,

    /// Fraction added to quote funds sent with a buy-on-primary order.
    #[serde(default)]
    pub bid_funds_markup: Decimal,

    // === Timing ===
    /// Detector tick interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Lifetime of a primary order before it is cancelled.
    #[serde(default = "default_order_lifetime_ms")]
    pub order_lifetime_ms: u64,

    /// Grace window after expiry that absorbs late fills.
    #[serde(default = "default_expiry_grace_ms")]
    pub expiry_grace_ms: u64,

    /// Sweep loop interval.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Batch reconciliation interval.
    #[serde(default = "default_batch_interval_secs")]
    pub batch_interval_secs: u64,

    /// How long failed records stay eligible for batching.
    #[serde(default = "default_batch_window_secs")]
    pub batch_window_secs: u64,

    /// How long a sent offset waits for the counterparty's reply before failing.
    #[serde(default = "default_offset_reply_timeout_ms")]
    pub offset_reply_timeout_ms: u64,

    /// How long observed trace ids stay in the dedupe registry.
    #[serde(default = "default_registry_retention_secs")]
    pub registry_retention_secs: u64,

    /// Balance refresh interval.
    #[serde(default = "default_balance_refresh_secs")]
    pub balance_refresh_secs: u64,

    /// Settlement confirmation poll interval.
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,

    /// Longest a producer waits on a full opportunity queue.
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// Timeout applied to every external call.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    // === Sizes ===
    /// Opportunity queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Book levels published per side.
    #[serde(default = "default_depth_limit")]
    pub depth_limit: usize,

    /// Confirmations fetched per poll.
    #[serde(default = "default_confirmation_page_limit")]
    pub confirmation_page_limit: usize,

    /// Number of transfer lock shards.
    #[serde(default = "default_transfer_lock_shards")]
    pub transfer_lock_shards: usize,

    // === Asset Tables ===
    /// Decimal places used to floor secondary-venue amounts, per sent asset.
    #[serde(default)]
    pub asset_precisions: AssetTable<u32>,

    /// Precision used for assets missing from `asset_precisions`.
    #[serde(default = "default_asset_precision")]
    pub default_asset_precision: u32,

    /// Minimum funds/notional for primary orders, per quote asset.
    #[serde(default)]
    pub quote_minimums: AssetTable<Decimal>,

    // === Fishing ===
    /// Synthesize price-improved opportunities from trade prints.
    #[serde(default = "default_true")]
    pub fishing_enabled: bool,

    /// Fraction of the print/quote gap given up when fishing.
    #[serde(default = "default_fishing_lower_percent")]
    pub fishing_lower_percent: Decimal,

    /// Prints older than this are ignored.
    #[serde(default = "default_fishing_window_secs")]
    pub fishing_window_secs: u64,

    /// Fraction of the print amount used for the fishing order.
    #[serde(default = "default_fishing_amount_ratio")]
    pub fishing_amount_ratio: Decimal,

    // === Venue Switches ===
    /// Send primary-venue orders.
    #[serde(default = "default_true")]
    pub enable_primary: bool,

    /// Send secondary-venue offset trades.
    #[serde(default = "default_true")]
    pub enable_secondary: bool,

    // === Observability ===
    /// Prometheus exporter port; disabled when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_settlement_api_url() -> String {
    "https://api.mixin.one".to_string()
}

fn default_cancel_amount() -> Decimal {
    Decimal::new(1, 8) // 0.00000001
}

fn default_book_ws_url() -> String {
    "wss://events.ocean.one".to_string()
}

fn default_quote_api_url() -> String {
    "https://exinone.com/exincore".to_string()
}

fn default_raw_margin() -> Decimal {
    Decimal::new(10, 3) // 0.010
}

fn default_primary_fee() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

fn default_secondary_fee() -> Decimal {
    Decimal::new(3, 3) // 0.003
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_order_lifetime_ms() -> u64 {
    5_000
}

fn default_expiry_grace_ms() -> u64 {
    3_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

fn default_batch_interval_secs() -> u64 {
    300
}

fn default_batch_window_secs() -> u64 {
    3_600
}

fn default_offset_reply_timeout_ms() -> u64 {
    60_000
}

fn default_registry_retention_secs() -> u64 {
    3_600
}

fn default_balance_refresh_secs() -> u64 {
    5
}

fn default_confirmation_poll_ms() -> u64 {
    100
}

fn default_enqueue_timeout_ms() -> u64 {
    5_000
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_queue_capacity() -> usize {
    10
}

fn default_depth_limit() -> usize {
    3
}

fn default_confirmation_page_limit() -> usize {
    500
}

fn default_transfer_lock_shards() -> usize {
    100
}

fn default_asset_precision() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

fn default_fishing_lower_percent() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_fishing_window_secs() -> u64 {
    300
}

fn default_fishing_amount_ratio() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.watch_pairs.is_empty() {
            return Err("WATCH_PAIRS must name at least one pair".to_string());
        }

        if self.primary_broker_ids.is_empty() {
            return Err("PRIMARY_BROKER_IDS must not be empty".to_string());
        }

        for (name, fee) in [("PRIMARY_FEE", self.primary_fee), ("SECONDARY_FEE", self.secondary_fee)] {
            if fee < Decimal::ZERO || fee >= Decimal::ONE {
                return Err(format!("{} must be in [0, 1)", name));
            }
        }

        if self.raw_margin <= Decimal::ZERO {
            return Err("RAW_MARGIN must be positive".to_string());
        }

        if self.bid_funds_markup < Decimal::ZERO {
            return Err("BID_FUNDS_MARKUP must not be negative".to_string());
        }

        if self.fishing_lower_percent < Decimal::ZERO || self.fishing_lower_percent > Decimal::ONE {
            return Err("FISHING_LOWER_PERCENT must be in [0, 1]".to_string());
        }

        if self.fishing_amount_ratio <= Decimal::ZERO || self.fishing_amount_ratio > Decimal::ONE {
            return Err("FISHING_AMOUNT_RATIO must be in (0, 1]".to_string());
        }

        if self.queue_capacity == 0 || self.depth_limit == 0 || self.transfer_lock_shards == 0 {
            return Err("QUEUE_CAPACITY, DEPTH_LIMIT and TRANSFER_LOCK_SHARDS must be positive".to_string());
        }

        if self.tick_interval_ms == 0 || self.sweep_interval_ms == 0 || self.confirmation_poll_ms == 0 {
            return Err("loop intervals must be positive".to_string());
        }

        Ok(())
    }

    /// Fee-adjusted break-even ratio an opportunity must strictly exceed.
    pub fn profit_threshold(&self) -> Decimal {
        crate::arbitrage::profit_threshold(self.raw_margin, self.primary_fee, self.secondary_fee)
    }

    /// Lifetime of a primary order.
    pub fn order_lifetime(&self) -> Duration {
        Duration::from_millis(self.order_lifetime_ms)
    }

    /// Grace window after expiry.
    pub fn expiry_grace(&self) -> Duration {
        Duration::from_millis(self.expiry_grace_ms)
    }

    /// Wait for the counterparty's reply to an offset.
    pub fn offset_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.offset_reply_timeout_ms)
    }

    /// Retention of observed registry entries.
    pub fn registry_retention(&self) -> Duration {
        Duration::from_secs(self.registry_retention_secs)
    }

    /// Timeout for external calls.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Precision used when flooring an amount of `asset` for the secondary venue.
    pub fn asset_precision(&self, asset: &Uuid) -> u32 {
        self.asset_precisions.get_or(asset, self.default_asset_precision)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) const BASE: &str = "c94ac88f-4671-3976-b60a-09064f1811e8";
    pub(crate) const QUOTE: &str = "815b0b1a-2764-3736-8faa-42d694fa620a";

    /// Fully populated configuration used across unit tests.
    pub(crate) fn test_config() -> Config {
        Config {
            client_id: Uuid::from_u128(0xC1),
            settlement_api_url: "https://test".to_string(),
            settlement_access_token: String::new(),
            primary_broker_ids: vec![Uuid::from_u128(0xB1)],
            secondary_routing_id: Uuid::from_u128(0x07C),
            cancel_asset_id: Uuid::from_u128(0xCA),
            cancel_amount: default_cancel_amount(),
            watch_pairs: vec![format!("{}-{}", BASE, QUOTE).parse().unwrap()],
            book_ws_url: "wss://test".to_string(),
            quote_api_url: "https://test".to_string(),
            raw_margin: default_raw_margin(),
            primary_fee: default_primary_fee(),
            secondary_fee: default_secondary_fee(),
            bid_funds_markup: Decimal::ZERO,
            tick_interval_ms: default_tick_interval_ms(),
            order_lifetime_ms: default_order_lifetime_ms(),
            expiry_grace_ms: default_expiry_grace_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            batch_interval_secs: default_batch_interval_secs(),
            batch_window_secs: default_batch_window_secs(),
            offset_reply_timeout_ms: default_offset_reply_timeout_ms(),
            registry_retention_secs: default_registry_retention_secs(),
            balance_refresh_secs: default_balance_refresh_secs(),
            confirmation_poll_ms: default_confirmation_poll_ms(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            queue_capacity: default_queue_capacity(),
            depth_limit: default_depth_limit(),
            confirmation_page_limit: default_confirmation_page_limit(),
            transfer_lock_shards: default_transfer_lock_shards(),
            asset_precisions: AssetTable::default(),
            default_asset_precision: default_asset_precision(),
            quote_minimums: AssetTable::default(),
            fishing_enabled: true,
            fishing_lower_percent: default_fishing_lower_percent(),
            fishing_window_secs: default_fishing_window_secs(),
            fishing_amount_ratio: default_fishing_amount_ratio(),
            enable_primary: true,
            enable_secondary: true,
            metrics_port: None,
            rust_log: default_log_level(),
        }
    }

    #[test]
    fn default_values_are_sensible() {
        assert_eq!(default_raw_margin(), dec!(0.010));
        assert_eq!(default_primary_fee(), dec!(0.001));
        assert_eq!(default_secondary_fee(), dec!(0.003));
        assert_eq!(default_cancel_amount(), dec!(0.00000001));
        assert_eq!(default_transfer_lock_shards(), 100);
        assert_eq!(default_offset_reply_timeout_ms(), 60_000);
        assert_eq!(default_registry_retention_secs(), 3_600);
        assert!(default_true());
    }

    #[test]
    fn test_config_is_valid() {
        assert_eq!(test_config().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_empty_pairs() {
        let mut config = test_config();
        config.watch_pairs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_fee_of_one() {
        let mut config = test_config();
        config.secondary_fee = Decimal::ONE;
        assert!(config.validate().is_err());
    }

    #[test]
    fn threshold_is_fee_adjusted() {
        let config = test_config();
        // 0.010 / (0.999 * 0.997)
        let threshold = config.profit_threshold();
        assert!(threshold > dec!(0.01004) && threshold < dec!(0.01005));
    }

    #[test]
    fn asset_precision_falls_back_to_default() {
        let mut config = test_config();
        let quote = Uuid::parse_str(QUOTE).unwrap();
        assert_eq!(config.asset_precision(&quote), 8);
        config.asset_precisions = format!("{}:2", QUOTE).parse().unwrap();
        assert_eq!(config.asset_precision(&quote), 2);
    }
}
