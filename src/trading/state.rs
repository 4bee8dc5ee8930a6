//! Trading state shared by the intake, sweep, batch and reconciler tasks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::arbitrage::{ArbitrageOpportunity, OpportunityStatus};

/// Handle guarded by one lock for the whole structure.
pub type SharedTradingState = Arc<Mutex<TradingState>>;

/// Registry entry of one primary trace id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// When settlement was fully observed; `None` while the order may still be live.
    pub observed_at: Option<Instant>,
}

/// In-flight opportunities, the pending-order registry and the failed ledger.
#[derive(Debug, Default)]
pub struct TradingState {
    /// Opportunities with a placed primary order, keyed by opportunity id.
    pub tracked: HashMap<Uuid, ArbitrageOpportunity>,
    /// Primary trace ids handled by intake.
    pub registry: HashMap<Uuid, Registration>,
    /// Failed records awaiting batch offset, keyed by opportunity id.
    pub failed: HashMap<Uuid, ArbitrageOpportunity>,
}

impl TradingState {
    /// Create an empty shared state.
    pub fn shared() -> SharedTradingState {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Whether a primary trace id has been seen by intake.
    pub fn is_registered(&self, trace_id: &Uuid) -> bool {
        self.registry.contains_key(trace_id)
    }

    /// Record a primary trace id with its observed flag.
    pub fn register(&mut self, trace_id: Uuid, observed: bool) {
        let observed_at = observed.then(Instant::now);
        self.registry.insert(trace_id, Registration { observed_at });
    }

    /// Forget a trace id whose order never went out.
    pub fn unregister(&mut self, trace_id: &Uuid) {
        self.registry.remove(trace_id);
    }

    /// Flip a registered trace id to observed. Unknown ids are left alone.
    pub fn mark_observed(&mut self, trace_id: &Uuid) {
        if let Some(entry) = self.registry.get_mut(trace_id) {
            entry.observed_at.get_or_insert_with(Instant::now);
        }
    }

    /// Whether the registry still expects settlement for `trace_id`.
    pub fn is_observed(&self, trace_id: &Uuid) -> bool {
        self.registry
            .get(trace_id)
            .map_or(false, |entry| entry.observed_at.is_some())
    }

    /// Trace ids still awaiting settlement.
    pub fn unobserved(&self) -> Vec<Uuid> {
        self.registry
            .iter()
            .filter(|(_, entry)| entry.observed_at.is_none())
            .map(|(trace, _)| *trace)
            .collect()
    }

    /// Drop entries observed at least `retention` before `now` whose record is
    /// no longer tracked. Returns the number removed.
    pub fn prune_registry(&mut self, now: Instant, retention: Duration) -> usize {
        let live: HashSet<Uuid> = self.tracked.values().map(|o| o.primary_trace).collect();
        let before = self.registry.len();
        self.registry.retain(|trace, entry| match entry.observed_at {
            Some(at) => at + retention > now || live.contains(trace),
            None => true,
        });
        before - self.registry.len()
    }

    /// Start tracking a placed opportunity.
    pub fn track(&mut self, opportunity: ArbitrageOpportunity) {
        self.tracked.insert(opportunity.id, opportunity);
    }

    /// Tracked record owning `primary_trace`.
    pub fn tracked_by_trace(&self, primary_trace: &Uuid) -> Option<&ArbitrageOpportunity> {
        self.tracked.values().find(|o| o.primary_trace == *primary_trace)
    }

    /// First non-terminal record, tracked or failed, that references any of `references`.
    pub fn find_mut(&mut self, references: &[Uuid]) -> Option<&mut ArbitrageOpportunity> {
        self.tracked
            .values_mut()
            .chain(self.failed.values_mut())
            .filter(|o| !o.status.is_terminal())
            .find(|o| references.iter().any(|r| o.references(r)))
    }

    /// Move a tracked record into the failed ledger.
    pub fn fail(&mut self, id: &Uuid) -> Option<&ArbitrageOpportunity> {
        let record = self.tracked.remove(id)?;
        debug_assert_eq!(record.status, OpportunityStatus::Failed);
        let id = record.id;
        self.failed.insert(id, record);
        self.failed.get(&id)
    }
}
