//! Sharded lock pool serializing outbound transfers.

use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Fixed pool of async mutexes keyed by `(recipient + asset) mod N`.
///
/// Two transfers of the same asset to the same recipient always land on the
/// same shard. Unrelated transfers usually do not, and proceed in parallel.
/// A larger `N` lowers contention at the cost of one mutex per shard.
#[derive(Debug)]
pub struct TransferLocks {
    shards: Vec<Mutex<()>>,
}

impl TransferLocks {
    /// Create a pool with `shards` locks (at least one).
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(())).collect();
        Self { shards }
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Always false; a pool holds at least one shard.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Shard index for a `(recipient, asset)` pair.
    pub fn shard(&self, recipient: &Uuid, asset: &Uuid) -> usize {
        let sum = recipient.as_u128().wrapping_add(asset.as_u128());
        (sum % self.shards.len() as u128) as usize
    }

    /// Wait for the shard owning `(recipient, asset)`.
    pub async fn acquire(&self, recipient: &Uuid, asset: &Uuid) -> MutexGuard<'_, ()> {
        self.shards[self.shard(recipient, asset)].lock().await
    }
}
