//! Settlement network records.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::SettlementError;

/// One inbound or outbound transfer observed on the settlement network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementConfirmation {
    /// Unique record id.
    pub id: String,
    /// Signed amount: positive received, negative sent.
    pub amount: Decimal,
    /// Asset moved.
    pub asset_id: Uuid,
    /// Other party of the transfer; absent for network-level records.
    pub counterparty_id: Option<Uuid>,
    /// Trace id of the transfer, when it is one of ours.
    pub trace_id: Option<Uuid>,
    /// Base64 memo; empty when none was attached.
    pub memo: String,
    /// When the transfer happened.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl SettlementConfirmation {
    /// Parse one record from the settlement API.
    pub fn from_json(value: serde_json::Value) -> Result<Self, SettlementError> {
        let raw: RawConfirmation =
            serde_json::from_value(value).map_err(|e| SettlementError::ParseError(e.to_string()))?;
        raw.try_into()
    }
}

#[derive(Debug, Deserialize)]
struct AssetRef {
    asset_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct RawConfirmation {
    #[serde(alias = "snapshot_id")]
    id: String,
    amount: Decimal,
    #[serde(default)]
    asset_id: Option<Uuid>,
    #[serde(default)]
    asset: Option<AssetRef>,
    #[serde(default, alias = "opponent_id", deserialize_with = "optional_uuid")]
    counterparty_id: Option<Uuid>,
    #[serde(default, deserialize_with = "optional_uuid")]
    trace_id: Option<Uuid>,
    #[serde(default, alias = "data")]
    memo: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl TryFrom<RawConfirmation> for SettlementConfirmation {
    type Error = SettlementError;

    fn try_from(raw: RawConfirmation) -> Result<Self, Self::Error> {
        let asset_id = raw
            .asset_id
            .or(raw.asset.map(|a| a.asset_id))
            .ok_or_else(|| SettlementError::ParseError(format!("record {} has no asset", raw.id)))?;

        Ok(Self {
            id: raw.id,
            amount: raw.amount,
            asset_id,
            counterparty_id: raw.counterparty_id,
            trace_id: raw.trace_id,
            memo: raw.memo.unwrap_or_default(),
            created_at: raw.created_at,
        })
    }
}

/// Empty strings and the nil uuid both mean "absent".
fn optional_uuid<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Uuid>, D::Error> {
    let value: Option<String> = Option::deserialize(deserializer)?;
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => {
            let id = Uuid::parse_str(s).map_err(serde::de::Error::custom)?;
            Ok((!id.is_nil()).then_some(id))
        }
    }
}

/// Outbound transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRequest {
    /// Asset to send.
    pub asset_id: Uuid,
    /// Receiving identity.
    #[serde(rename = "opponent_id")]
    pub recipient_id: Uuid,
    /// Amount to send, always positive.
    pub amount: Decimal,
    /// Idempotency key.
    pub trace_id: Uuid,
    /// Base64 memo.
    pub memo: String,
}
