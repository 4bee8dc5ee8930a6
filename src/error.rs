//! Unified error types for the arbitrage engine.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the arbitrage engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration was loaded but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Order book synchronization error.
    #[error("order book error: {0}")]
    Book(#[from] BookError),

    /// Memo encoding/decoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Counterparty quote error.
    #[error("market error: {0}")]
    Market(#[from] MarketError),

    /// Trading/order error.
    #[error("trading error: {0}")]
    Trading(#[from] TradingError),

    /// Settlement network error.
    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// The engine is not running or the pair is unknown.
    #[error("engine error: {0}")]
    Lifecycle(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Order book sequencing and event errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    /// Event sequence was already applied or is older than the last one.
    #[error("stale sequence {sequence}, last applied {last}")]
    StaleSequence {
        /// Sequence carried by the rejected event.
        sequence: u64,
        /// Last applied sequence.
        last: u64,
    },

    /// A gap was detected; the book was cleared and needs a fresh snapshot.
    #[error("sequence gap: expected {expected}, got {got}; resync required")]
    SequenceGap {
        /// Sequence the book expected next.
        expected: u64,
        /// Sequence actually received.
        got: u64,
    },

    /// Incremental event received while the book waits for a full reset.
    #[error("book awaiting snapshot, dropped sequence {sequence}")]
    AwaitingSnapshot {
        /// Sequence of the dropped event.
        sequence: u64,
    },

    /// Event payload does not match its declared kind.
    #[error("malformed book event: {0}")]
    Malformed(String),
}

impl BookError {
    /// Whether the caller must resubscribe to a fresh snapshot.
    pub fn needs_resync(&self) -> bool {
        matches!(self, Self::SequenceGap { .. } | Self::AwaitingSnapshot { .. })
    }
}

/// Binary memo protocol errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Memo is not valid base64.
    #[error("invalid base64 memo: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Msgpack encoding failed.
    #[error("memo encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Msgpack decoding failed.
    #[error("memo decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Encoded memo exceeds the transfer memo limit.
    #[error("memo is {size} bytes, limit is {limit}")]
    TooLarge {
        /// Encoded size in bytes.
        size: usize,
        /// Maximum allowed size.
        limit: usize,
    },

    /// Decoded map carries neither a complete place nor a cancel shape.
    #[error("order action shape is ambiguous or incomplete: {0}")]
    InvalidShape(String),
}

/// Counterparty quote errors.
#[derive(Error, Debug)]
pub enum MarketError {
    /// Quote request failed.
    #[error("failed to fetch quote for {pair}: {reason}")]
    FetchFailed {
        /// Pair being quoted.
        pair: String,
        /// Reason for failure.
        reason: String,
    },

    /// The counterparty does not quote this direction.
    #[error("no quote for {send} -> {get}")]
    NotQuoted {
        /// Asset sent to the counterparty.
        send: Uuid,
        /// Asset received from the counterparty.
        get: Uuid,
    },

    /// Failed to parse quote data.
    #[error("failed to parse quote data: {0}")]
    ParseError(String),

    /// Quote request exceeded its timeout.
    #[error("quote request timed out")]
    Timeout,

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Trading and order execution errors.
#[derive(Error, Debug)]
pub enum TradingError {
    /// Order parameters rejected before sending.
    #[error("invalid order parameters: {0}")]
    InvalidParams(String),

    /// Not enough balance to send the order.
    #[error("insufficient balance of {asset}: need {required}, have {available}")]
    InsufficientBalance {
        /// Asset that is short.
        asset: Uuid,
        /// Required amount.
        required: Decimal,
        /// Available amount.
        available: Decimal,
    },

    /// Outbound transfer carrying the order failed.
    #[error("transfer for trace {trace_id} failed: {source}")]
    TransferFailed {
        /// Trace id of the failed transfer.
        trace_id: Uuid,
        /// Underlying settlement error.
        #[source]
        source: SettlementError,
    },

    /// Memo could not be encoded.
    #[error("memo encoding failed: {0}")]
    Memo(#[from] ProtocolError),

    /// A venue leg is disabled by configuration.
    #[error("{0} venue trading is disabled")]
    VenueDisabled(&'static str),

    /// Operation exceeded its timeout.
    #[error("order operation timed out after {millis}ms")]
    Timeout {
        /// Timeout that elapsed.
        millis: u64,
    },
}

impl TradingError {
    /// Whether the next tick may retry the same operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::TransferFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// Settlement network errors.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// The settlement API rejected the request.
    #[error("settlement api error: {0}")]
    Api(String),

    /// Request exceeded its timeout.
    #[error("settlement request timed out")]
    Timeout,

    /// Memo on a confirmation could not be decoded.
    #[error("malformed memo on confirmation {confirmation_id}: {source}")]
    MalformedMemo {
        /// Confirmation carrying the memo.
        confirmation_id: String,
        /// Decoder error.
        #[source]
        source: ProtocolError,
    },

    /// Failed to parse settlement data.
    #[error("failed to parse settlement data: {0}")]
    ParseError(String),

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl SettlementError {
    /// Whether the failure is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::HttpError(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            _ => false,
        }
    }
}

/// WebSocket connection and message errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Message parsing failed.
    #[error("failed to parse websocket message: {0}")]
    ParseError(String),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// No message arrived within the idle window.
    #[error("no message in {secs}s")]
    Idle {
        /// Idle window in seconds.
        secs: u64,
    },

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;
