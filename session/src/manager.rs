//! SessionManager
//!
//! Owns at most one monitoring session per engine instance and exposes the
//! control surface request handlers call into:
//!   • `start` / `stop` (idempotent)
//!   • `current_snapshot` / `status` for newly connected clients
//!   • subscriber registration for the update stream
//!
//! The session itself runs as a spawned task (see `runner`); the manager keeps
//! its shutdown handle and shared state.

use std::sync::Arc;

use adapters::BrowserDriver;
use common::logger::{TraceId, session_span};
use corelib::{AuctionSnapshot, MonitorUpdate};
use monitor::counters::CountersSnapshot;
use monitor::{
    Broadcaster, MonitorConfig, MonitorCounters, SiteProfile, SnapshotStore, SubscriberId,
};
use parking_lot::RwLock;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{Instrument, info, instrument, warn};

use crate::error::SessionError;
use crate::model::{MonitoringSession, SessionId, SessionPhase, SharedSession};
use crate::runner::SessionRunner;

struct ActiveSession {
    shared: SharedSession,
    store: SnapshotStore,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SessionManager<D: BrowserDriver + 'static> {
    driver: Arc<D>,
    config: MonitorConfig,
    counters: MonitorCounters,
    broadcaster: Broadcaster,
    active: Mutex<Option<ActiveSession>>,
}

impl<D: BrowserDriver + 'static> SessionManager<D> {
    pub fn new(driver: Arc<D>, config: MonitorConfig) -> Self {
        let counters = MonitorCounters::default();
        Self {
            driver,
            config,
            broadcaster: Broadcaster::new(counters.clone()),
            counters,
            active: Mutex::new(None),
        }
    }

    /// Start monitoring `target` and wait for the initial snapshot.
    ///
    /// Rejects while another session is active. Relative targets are resolved
    /// against the site's base URL. If the first snapshot does not arrive
    /// within `start_timeout`, the session is stopped and the error returned.
    #[instrument(skip(self))]
    pub async fn start(&self, target: &str) -> Result<SessionId, SessionError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(SessionError::InvalidTarget(target.to_string()));
        }

        let profile = SiteProfile::for_target(target);
        let url = profile.normalize_target(target);
        let auction_id = profile.auction_id(&url);

        let (id, ready_rx) = {
            let mut slot = self.active.lock().await;

            if let Some(current) = slot.as_ref() {
                let s = current.shared.read();
                if s.is_active {
                    return Err(SessionError::AlreadyActive(s.target.clone()));
                }
            }

            // A session that ended on its own is replaced.
            if let Some(stale) = slot.take() {
                stale.handle.abort();
            }

            let session = MonitoringSession::new(url.clone(), profile.kind, auction_id.clone());
            let id = session.id;
            let shared: SharedSession = Arc::new(RwLock::new(session));
            let store = SnapshotStore::new(&auction_id);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let (ready_tx, ready_rx) = oneshot::channel();

            let span = session_span(&profile.kind.to_string(), &url, &TraceId::default());

            let runner = SessionRunner {
                driver: Arc::clone(&self.driver),
                profile,
                config: self.config.clone(),
                session: Arc::clone(&shared),
                store: store.clone(),
                broadcaster: self.broadcaster.clone(),
                counters: self.counters.clone(),
                shutdown: shutdown_rx,
                console: None,
            };

            let handle = tokio::spawn(runner.run(ready_tx).instrument(span));

            *slot = Some(ActiveSession {
                shared,
                store,
                shutdown: shutdown_tx,
                handle,
            });

            info!(session = %id, %url, %auction_id, "monitoring session started");
            (id, ready_rx)
        };

        match timeout(self.config.start_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(id),
            Ok(Ok(Err(e))) => {
                self.stop().await;
                Err(SessionError::Driver(e))
            }
            Ok(Err(_)) => {
                self.stop().await;
                Err(SessionError::Aborted)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.start_timeout.as_millis() as u64,
                    "no initial snapshot in time, stopping session"
                );
                self.stop().await;
                Err(SessionError::StartTimeout(self.config.start_timeout))
            }
        }
    }

    /// Stop the current session. Safe to call in any state and any number of
    /// times. On return no extraction is in flight.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let Some(active) = self.active.lock().await.take() else {
            return;
        };

        active.shared.write().is_active = false;
        let _ = active.shutdown.send(true);

        let mut handle = active.handle;
        if timeout(self.config.stop_timeout, &mut handle).await.is_err() {
            warn!(
                timeout_ms = self.config.stop_timeout.as_millis() as u64,
                "session task did not stop in time, aborting"
            );
            handle.abort();
            let _ = handle.await;

            active.shared.write().phase = SessionPhase::Stopped;
            self.broadcaster.publish(&MonitorUpdate {
                is_monitoring: false,
                snapshot: active.store.get(),
                changed: false,
                initial_load: false,
                origin: None,
            });
        }

        info!("monitoring session stopped");
    }

    pub async fn is_monitoring(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| a.shared.read().is_active)
    }

    /// Latest canonical snapshot, `None` when idle or before the first pull.
    pub async fn current_snapshot(&self) -> Option<AuctionSnapshot> {
        self.active.lock().await.as_ref().and_then(|a| a.store.get())
    }

    /// Message for a newly connected client.
    pub async fn status(&self) -> MonitorUpdate {
        let guard = self.active.lock().await;
        let (is_monitoring, snapshot) = match guard.as_ref() {
            Some(a) => (a.shared.read().is_active, a.store.get()),
            None => (false, None),
        };

        MonitorUpdate {
            is_monitoring,
            snapshot,
            changed: false,
            initial_load: false,
            origin: None,
        }
    }

    /// Copy of the session record, if one exists.
    pub async fn session(&self) -> Option<MonitoringSession> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.shared.read().clone())
    }

    pub async fn phase(&self) -> Option<SessionPhase> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|a| a.shared.read().phase)
    }

    pub fn subscribe(&self) -> (SubscriberId, Receiver<MonitorUpdate>) {
        self.broadcaster.subscribe(self.config.subscriber_capacity)
    }

    pub fn register(&self, sender: Sender<MonitorUpdate>) -> SubscriberId {
        self.broadcaster.register(sender)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }
}
