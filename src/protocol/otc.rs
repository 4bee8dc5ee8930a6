//! Secondary-venue (OTC) trade memo and its reply.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::memo::{self, non_empty, WireUuid};
use crate::error::ProtocolError;

/// Outbound memo naming the asset the counterparty should pay out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtcOrderAction {
    /// Asset to receive.
    pub asset: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawOtcOrderAction {
    #[serde(rename = "A")]
    asset: WireUuid,
}

impl OtcOrderAction {
    /// Encode as a base64 memo.
    pub fn pack(&self) -> Result<String, ProtocolError> {
        memo::pack(&RawOtcOrderAction {
            asset: WireUuid(self.asset),
        })
    }

    /// Decode from a base64 memo.
    pub fn unpack(encoded: &str) -> Result<Self, ProtocolError> {
        let raw: RawOtcOrderAction = memo::unpack(encoded)?;
        Ok(Self { asset: raw.asset.0 })
    }
}

/// Kind of counterparty reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtcReplyKind {
    /// Refund of the sent asset (`F`).
    Refund,
    /// Trade proceeds (`R`).
    Return,
    /// Counterparty error (`E`).
    Error,
}

impl OtcReplyKind {
    fn code(&self) -> &'static str {
        match self {
            OtcReplyKind::Refund => "F",
            OtcReplyKind::Return => "R",
            OtcReplyKind::Error => "E",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "F" => Some(OtcReplyKind::Refund),
            "R" => Some(OtcReplyKind::Return),
            "E" => Some(OtcReplyKind::Error),
            _ => None,
        }
    }
}

/// Inbound memo on a counterparty confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtcReply {
    /// Status code.
    pub code: i64,
    /// Execution price, set on returns.
    pub price: Option<String>,
    /// Counterparty fee, set on returns.
    pub fee: Option<String>,
    /// Asset the fee was charged in.
    pub fee_asset: Option<String>,
    /// Reply kind.
    pub kind: Option<OtcReplyKind>,
    /// Trace id of the trade this reply settles.
    pub order: Option<Uuid>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawOtcReply {
    #[serde(rename = "C", default)]
    code: i64,
    #[serde(rename = "P", default, skip_serializing_if = "Option::is_none")]
    price: Option<String>,
    #[serde(rename = "F", default, skip_serializing_if = "Option::is_none")]
    fee: Option<String>,
    #[serde(rename = "FA", default, skip_serializing_if = "Option::is_none")]
    fee_asset: Option<String>,
    #[serde(rename = "T", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(rename = "O", default, skip_serializing_if = "Option::is_none")]
    order: Option<WireUuid>,
}

impl OtcReply {
    /// Encode as a base64 memo.
    pub fn pack(&self) -> Result<String, ProtocolError> {
        memo::pack(&RawOtcReply {
            code: self.code,
            price: self.price.clone(),
            fee: self.fee.clone(),
            fee_asset: self.fee_asset.clone(),
            kind: self.kind.map(|k| k.code().to_string()),
            order: self.order.map(WireUuid),
        })
    }

    /// Decode from a base64 memo.
    pub fn unpack(encoded: &str) -> Result<Self, ProtocolError> {
        let raw: RawOtcReply = memo::unpack(encoded)?;
        Ok(Self {
            code: raw.code,
            price: non_empty(raw.price),
            fee: non_empty(raw.fee),
            fee_asset: non_empty(raw.fee_asset),
            kind: non_empty(raw.kind).as_deref().and_then(OtcReplyKind::from_code),
            order: raw.order.and_then(WireUuid::present),
        })
    }
}
