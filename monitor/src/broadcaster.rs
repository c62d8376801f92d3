use std::collections::HashMap;
use std::sync::Arc;

use corelib::MonitorUpdate;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::counters::MonitorCounters;

pub type SubscriberId = Uuid;

/// Fan-out of [`MonitorUpdate`]s to external sinks.
///
/// Delivery is at most once: a subscriber whose buffer is full misses that
/// update and catches up with the next one, which always carries the full
/// snapshot.
#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<Mutex<HashMap<SubscriberId, Sender<MonitorUpdate>>>>,
    counters: MonitorCounters,
}

impl Broadcaster {
    pub fn new(counters: MonitorCounters) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            counters,
        }
    }

    pub fn subscribe(&self, capacity: usize) -> (SubscriberId, Receiver<MonitorUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (self.register(tx), rx)
    }

    /// Registers an externally created sink.
    pub fn register(&self, sender: Sender<MonitorUpdate>) -> SubscriberId {
        let id = Uuid::new_v4();
        self.subscribers.lock().insert(id, sender);
        debug!(subscriber = %id, "subscriber registered");
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Returns the number of subscribers that accepted the update.
    pub fn publish(&self, update: &MonitorUpdate) -> usize {
        MonitorCounters::inc(&self.counters.publishes);

        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;

        subscribers.retain(|id, tx| match tx.try_send(update.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                MonitorCounters::inc(&self.counters.dropped_deliveries);
                warn!(subscriber = %id, "subscriber lagging, update dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = %id, "subscriber gone, removing");
                false
            }
        });

        delivered
    }
}
