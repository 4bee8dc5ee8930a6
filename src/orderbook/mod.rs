//! Order book module for the primary venue.
//!
//! This module handles:
//! - Order book types and data structures
//! - Book-diff event parsing and the sequenced book state machine
//! - The single-writer task that owns each book
//! - WebSocket feed for real-time updates

pub mod book;
pub mod event;
pub mod types;
pub mod websocket;
pub mod writer;

pub use book::OrderBook;
pub use event::{BookEvent, BookEventKind, BookPayload, LevelChange};
pub use types::{BookSnapshot, Depth, PriceLevel, TradePrint};
pub use websocket::{BookFeed, FeedMessage, ReconnectConfig};
pub use writer::{spawn_book_writer, BookHandle};
