//! Audit trail of opportunity records.

use std::sync::Arc;

use parking_lot::Mutex;
use strum::Display;
use tracing::{info, warn};

use crate::arbitrage::ArbitrageOpportunity;

/// Why a record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AuditEvent {
    /// Primary order placed.
    Created,
    /// Reached `Success`, `Failed` or `Done`.
    Settled,
    /// Dropped from the failed ledger without being offset.
    Expired,
    /// Still tracked when the engine stopped.
    Shutdown,
}

/// Receives opportunity records at lifecycle boundaries.
pub trait AuditSink: Send + Sync {
    /// Record `opportunity` for `event`.
    fn record(&self, event: AuditEvent, opportunity: &ArbitrageOpportunity);
}

/// Writes each record as JSON through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent, opportunity: &ArbitrageOpportunity) {
        match serde_json::to_string(opportunity) {
            Ok(json) => info!(
                target: "audit",
                event = %event,
                opportunity_id = %opportunity.id,
                status = %opportunity.status,
                record = %json,
                "Opportunity record"
            ),
            Err(e) => warn!(opportunity_id = %opportunity.id, error = %e, "Audit record not serializable"),
        }
    }
}

/// Keeps records in memory for inspection in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<(AuditEvent, ArbitrageOpportunity)>>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn records(&self) -> Vec<(AuditEvent, ArbitrageOpportunity)> {
        self.records.lock().clone()
    }

    /// Records written for `event`.
    pub fn events(&self, event: AuditEvent) -> Vec<ArbitrageOpportunity> {
        self.records
            .lock()
            .iter()
            .filter(|(e, _)| *e == event)
            .map(|(_, o)| o.clone())
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent, opportunity: &ArbitrageOpportunity) {
        self.records.lock().push((event, opportunity.clone()));
    }
}
