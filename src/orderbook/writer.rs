//! Single-writer task that owns an [`OrderBook`] and publishes snapshots.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::book::OrderBook;
use super::event::BookEvent;
use super::types::BookSnapshot;
use crate::error::BookError;
use crate::market::TradingPair;
use crate::metrics;

const COMMAND_BUFFER: usize = 1000;

struct ApplyCommand {
    event: BookEvent,
    reply: oneshot::Sender<Result<(), BookError>>,
}

/// Cloneable handle to a running book writer.
#[derive(Debug, Clone)]
pub struct BookHandle {
    pair: TradingPair,
    commands: mpsc::Sender<ApplyCommand>,
    snapshots: watch::Receiver<BookSnapshot>,
}

impl BookHandle {
    /// Pair served by this writer.
    pub fn pair(&self) -> TradingPair {
        self.pair
    }

    /// Hand an event to the writer and wait for the outcome.
    pub async fn apply(&self, event: BookEvent) -> Result<(), BookError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(ApplyCommand { event, reply })
            .await
            .map_err(|_| BookError::Malformed(format!("book writer for {} stopped", self.pair)))?;
        outcome
            .await
            .map_err(|_| BookError::Malformed(format!("book writer for {} dropped reply", self.pair)))?
    }

    /// Latest consistent snapshot.
    pub fn snapshot(&self) -> BookSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> watch::Receiver<BookSnapshot> {
        self.snapshots.clone()
    }
}

/// Spawn the writer task for `pair`.
pub fn spawn_book_writer(
    pair: TradingPair,
    depth_limit: usize,
    mut shutdown: watch::Receiver<bool>,
) -> (BookHandle, JoinHandle<()>) {
    let (commands, mut rx) = mpsc::channel::<ApplyCommand>(COMMAND_BUFFER);
    let (publish, snapshots) = watch::channel(BookSnapshot::default());

    let task = tokio::spawn(async move {
        let mut book = OrderBook::new(pair);
        info!(pair = %pair, "Book writer started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                command = rx.recv() => {
                    let Some(ApplyCommand { event, reply }) = command else { break };
                    let result = book.apply(&event);
                    match &result {
                        Ok(()) => metrics::inc_book_events_applied(),
                        Err(BookError::StaleSequence { sequence, last }) => {
                            debug!(pair = %pair, sequence, last, "Stale book event ignored");
                        }
                        Err(e) if e.needs_resync() => {
                            metrics::inc_book_resyncs();
                            warn!(pair = %pair, error = %e, "Book needs resync");
                        }
                        Err(e) => warn!(pair = %pair, error = %e, "Book event rejected"),
                    }
                    publish.send_replace(book.snapshot(depth_limit));
                    let _ = reply.send(result);
                }
            }
        }

        info!(pair = %pair, "Book writer stopped");
    });

    (
        BookHandle {
            pair,
            commands,
            snapshots,
        },
        task,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Side;
    use crate::orderbook::event::{BookEventKind, LevelChange};
    use crate::orderbook::types::PriceLevel;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[tokio::test]
    async fn writer_applies_and_publishes() {
        let (_stop, shutdown) = watch::channel(false);
        let pair = TradingPair::new(Uuid::from_u128(1), Uuid::from_u128(2));
        let (handle, _task) = spawn_book_writer(pair, 2, shutdown);

        handle
            .apply(BookEvent::reset(
                "m",
                1,
                vec![PriceLevel::new(dec!(99), dec!(1), dec!(99))],
                vec![PriceLevel::new(dec!(100), dec!(1), dec!(100))],
            ))
            .await
            .unwrap();

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.sequence, Some(1));
        assert_eq!(snapshot.depth.best_ask().map(|l| l.price), Some(dec!(100)));

        let gap = handle
            .apply(BookEvent::change(
                "m",
                BookEventKind::Open,
                3,
                LevelChange {
                    side: Side::Bid,
                    price: dec!(98),
                    amount: dec!(1),
                    funds: None,
                },
            ))
            .await;
        assert!(matches!(gap, Err(BookError::SequenceGap { .. })));
        let snapshot = handle.snapshot();
        assert!(snapshot.needs_resync);
        assert!(snapshot.depth.is_empty());
    }

    #[tokio::test]
    async fn writer_stops_on_shutdown() {
        let (stop, shutdown) = watch::channel(false);
        let pair = TradingPair::new(Uuid::from_u128(1), Uuid::from_u128(2));
        let (_handle, task) = spawn_book_writer(pair, 2, shutdown);

        stop.send(true).unwrap();
        task.await.unwrap();
    }
}
