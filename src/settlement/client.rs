//! Settlement network API client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::types::{SettlementConfirmation, TransferRequest};
use crate::config::Config;
use crate::error::SettlementError;
use crate::metrics;
use crate::trading::BalanceSource;

/// Outbound transfers and the confirmation feed.
#[async_trait]
pub trait SettlementClient: Send + Sync {
    /// Send a transfer. Replaying the same trace id is a no-op on the network.
    async fn transfer(&self, request: &TransferRequest) -> Result<(), SettlementError>;

    /// Records created at or after `since`, oldest first.
    async fn confirmations(
        &self,
        since: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<SettlementConfirmation>, SettlementError>;
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: Option<T>,
    #[serde(default)]
    error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    fn into_data(self) -> Result<T, SettlementError> {
        if let Some(e) = self.error {
            return Err(SettlementError::Api(format!("{} {}", e.code, e.description)));
        }
        self.data
            .ok_or_else(|| SettlementError::ParseError("response has no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct AssetBalance {
    asset_id: Uuid,
    balance: Decimal,
}

/// HTTP client for the settlement API.
#[derive(Debug, Clone)]
pub struct HttpSettlementClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    timeout: Duration,
}

impl HttpSettlementClient {
    /// Create a client from config.
    pub fn new(config: &Config) -> Result<Self, SettlementError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .connect_timeout(Duration::from_millis(500))
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http,
            base_url: config.settlement_api_url.trim_end_matches('/').to_string(),
            access_token: config.settlement_access_token.clone(),
            timeout: config.http_timeout(),
        })
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SettlementError> {
        let response = tokio::time::timeout(self.timeout, request.bearer_auth(&self.access_token).send())
            .await
            .map_err(|_| SettlementError::Timeout)??;

        let status = response.status();
        if status.is_server_error() {
            response.error_for_status_ref()?;
        }

        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| SettlementError::ParseError(format!("HTTP {}: {}", status, e)))?;
        body.into_data()
    }
}

#[async_trait]
impl SettlementClient for HttpSettlementClient {
    #[instrument(skip(self, request), fields(trace_id = %request.trace_id, asset = %request.asset_id))]
    async fn transfer(&self, request: &TransferRequest) -> Result<(), SettlementError> {
        let _timer = metrics::timer_transfer();
        let url = format!("{}/transfers", self.base_url);
        let _: serde_json::Value = self.send(self.http.post(&url).json(request)).await?;
        debug!(amount = %request.amount, recipient = %request.recipient_id, "Transfer sent");
        Ok(())
    }

    async fn confirmations(
        &self,
        since: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<SettlementConfirmation>, SettlementError> {
        let url = format!("{}/network/snapshots", self.base_url);
        let offset = since
            .format(&Rfc3339)
            .map_err(|e| SettlementError::ParseError(e.to_string()))?;
        let records: Vec<serde_json::Value> = self
            .send(self.http.get(&url).query(&[
                ("offset", offset),
                ("order", "ASC".to_string()),
                ("limit", limit.to_string()),
            ]))
            .await?;

        let mut confirmations = Vec::with_capacity(records.len());
        for record in records {
            match SettlementConfirmation::from_json(record) {
                Ok(c) => confirmations.push(c),
                Err(e) => warn!(error = %e, "Skipping unparseable settlement record"),
            }
        }
        Ok(confirmations)
    }
}

#[async_trait]
impl BalanceSource for HttpSettlementClient {
    async fn balances(&self) -> Result<HashMap<Uuid, Decimal>, SettlementError> {
        let url = format!("{}/assets", self.base_url);
        let assets: Vec<AssetBalance> = self.send(self.http.get(&url)).await?;
        Ok(assets.into_iter().map(|a| (a.asset_id, a.balance)).collect())
    }
}
