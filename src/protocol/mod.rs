//! Binary memo protocol carried on settlement transfers.
//!
//! This module handles:
//! - Primary-venue order actions and transfer replies
//! - Secondary-venue trade memos and replies
//! - The shared base64 + msgpack framing

pub mod memo;
pub mod order_action;
pub mod otc;

pub use memo::MAX_MEMO_BYTES;
pub use order_action::{OrderAction, OrderType, PlaceOrder, TransferReply};
pub use otc::{OtcOrderAction, OtcReply, OtcReplyKind};
