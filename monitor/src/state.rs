use std::sync::Arc;

use corelib::{AuctionSnapshot, ChangeEvent};
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub snapshot: AuctionSnapshot,
    pub changed: bool,
}

/// Canonical snapshot of the monitored auction.
///
/// Push and pull observations both go through [`SnapshotStore::apply`]; nothing
/// else writes the snapshot.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    auction_id: Arc<str>,
    inner: Arc<RwLock<Option<AuctionSnapshot>>>,
}

impl SnapshotStore {
    pub fn new(auction_id: &str) -> Self {
        Self {
            auction_id: Arc::from(auction_id),
            inner: Arc::new(RwLock::new(None)),
        }
    }

    pub fn auction_id(&self) -> &str {
        &self.auction_id
    }

    /// Field-wise merge of `event` into the snapshot.
    ///
    /// The first event seeds the snapshot from sentinels and always counts as
    /// a change.
    pub fn apply(&self, event: &ChangeEvent) -> Merged {
        let mut guard = self.inner.write();

        let (snapshot, changed) = match guard.as_mut() {
            Some(current) => {
                let changed = current.merge(&event.update, event.timestamp);
                (current.clone(), changed)
            }
            None => {
                let mut fresh = AuctionSnapshot::sentinel(&*self.auction_id, event.timestamp);
                fresh.merge(&event.update, event.timestamp);
                *guard = Some(fresh.clone());
                (fresh, true)
            }
        };

        Merged { snapshot, changed }
    }

    pub fn get(&self) -> Option<AuctionSnapshot> {
        self.inner.read().clone()
    }

    pub fn reset(&self) {
        *self.inner.write() = None;
    }
}
