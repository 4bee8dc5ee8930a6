//! Delay queue of pending cancel-if-still-open timers.
//!
//! Intake hands deadlines to the sweep loop through a [`CancelTimer`]; the
//! sweep loop owns the [`CancelSchedule`] and drains whatever is due each tick.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Sending half used by intake to schedule cancels.
#[derive(Debug, Clone)]
pub struct CancelTimer {
    tx: mpsc::UnboundedSender<(Instant, Uuid)>,
}

impl CancelTimer {
    /// Schedule a cancel of `trace_id` at `deadline`. False once the schedule is gone.
    pub fn schedule(&self, deadline: Instant, trace_id: Uuid) -> bool {
        self.tx.send((deadline, trace_id)).is_ok()
    }
}

/// Min-heap of `(deadline, primary trace id)`.
#[derive(Debug, Default)]
pub struct CancelSchedule {
    heap: BinaryHeap<Reverse<(Instant, Uuid)>>,
    inbox: Option<mpsc::UnboundedReceiver<(Instant, Uuid)>>,
}

impl CancelSchedule {
    /// Create an empty schedule without an inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a schedule fed by the returned timer handle.
    pub fn channel() -> (CancelTimer, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            CancelTimer { tx },
            Self {
                heap: BinaryHeap::new(),
                inbox: Some(rx),
            },
        )
    }

    /// Schedule a cancel of `trace_id` at `deadline`.
    pub fn push(&mut self, deadline: Instant, trace_id: Uuid) {
        self.heap.push(Reverse((deadline, trace_id)));
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.drain_inbox();
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Remove and return every trace id due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<Uuid> {
        self.drain_inbox();
        let mut due = Vec::new();
        while let Some(Reverse((at, trace_id))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            due.push(trace_id);
        }
        due
    }

    /// Pending timers, including ones not yet drained from the inbox.
    pub fn len(&mut self) -> usize {
        self.drain_inbox();
        self.heap.len()
    }

    /// True when nothing is scheduled.
    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    fn drain_inbox(&mut self) {
        if let Some(inbox) = self.inbox.as_mut() {
            while let Ok((deadline, trace_id)) = inbox.try_recv() {
                self.heap.push(Reverse((deadline, trace_id)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pops_in_deadline_order() {
        let now = Instant::now();
        let mut schedule = CancelSchedule::new();
        schedule.push(now + Duration::from_secs(3), Uuid::from_u128(3));
        schedule.push(now + Duration::from_secs(1), Uuid::from_u128(1));
        schedule.push(now + Duration::from_secs(2), Uuid::from_u128(2));

        assert_eq!(schedule.next_deadline(), Some(now + Duration::from_secs(1)));
        assert!(schedule.pop_due(now).is_empty());
        assert_eq!(
            schedule.pop_due(now + Duration::from_secs(2)),
            vec![Uuid::from_u128(1), Uuid::from_u128(2)]
        );
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.pop_due(now + Duration::from_secs(10)), vec![Uuid::from_u128(3)]);
        assert!(schedule.is_empty());
    }

    #[test]
    fn timer_feeds_schedule() {
        let now = Instant::now();
        let (timer, mut schedule) = CancelSchedule::channel();
        assert!(timer.schedule(now, Uuid::from_u128(1)));
        assert_eq!(schedule.pop_due(now), vec![Uuid::from_u128(1)]);

        drop(schedule);
        assert!(!timer.schedule(now, Uuid::from_u128(2)));
    }
}
