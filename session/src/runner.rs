//! Per-session state machine.
//!
//! ```text
//! Starting -> Resolving -> Observing <-> Recovering
//!     \            \           |            /
//!      `------------`----> Stopped <-------'
//! ```
//!
//! One task owns the session: it navigates, resolves the auction context,
//! installs the page observer, publishes the initial snapshot and then
//! multiplexes the health-check timer, the page console and the shutdown
//! signal. Every snapshot write goes through [`SnapshotStore::apply`].

use std::future::Future;
use std::sync::Arc;

use adapters::{BrowserDriver, ConsoleMessage, ContextHandle, DriverError};
use chrono::Utc;
use common::logger::{child_span, warn_if_slow};
use corelib::{ChangeEvent, MonitorUpdate, Origin};
use monitor::extractor::{self, ExtractOptions};
use monitor::injector::{self, Decoded, InstallOutcome};
use monitor::resolver;
use monitor::state::Merged;
use monitor::{Broadcaster, MonitorConfig, MonitorCounters, SiteProfile, SnapshotStore};
use tokio::sync::mpsc::Receiver;
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tracing::{Instrument, Span, debug, error, field, info, warn};

use crate::model::{SessionPhase, SharedSession};

pub(crate) type ReadySender = oneshot::Sender<Result<(), DriverError>>;

pub(crate) struct SessionRunner<D: BrowserDriver + 'static> {
    pub driver: Arc<D>,
    pub profile: SiteProfile,
    pub config: MonitorConfig,
    pub session: SharedSession,
    pub store: SnapshotStore,
    pub broadcaster: Broadcaster,
    pub counters: MonitorCounters,
    pub shutdown: watch::Receiver<bool>,
    pub console: Option<Receiver<ConsoleMessage>>,
}

/// Races `fut` against the shutdown signal. `None` means stop was requested.
async fn or_shutdown<F: Future>(shutdown: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    if *shutdown.borrow() {
        return None;
    }

    tokio::select! {
        out = fut => Some(out),
        _ = shutdown.changed() => None,
    }
}

async fn next_console(console: &mut Option<Receiver<ConsoleMessage>>) -> Option<ConsoleMessage> {
    match console {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<D: BrowserDriver + 'static> SessionRunner<D> {
    pub async fn run(mut self, ready: ReadySender) {
        let mut ready = Some(ready);

        match self.drive(&mut ready).await {
            Ok(()) => self.finish(None).await,
            Err(e) => {
                error!(error = %e, "browser unusable, ending session");
                self.finish(Some(&e)).await;
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e));
                }
            }
        }
    }

    /// Runs until stop (`Ok`) or a fatal driver failure (`Err`).
    async fn drive(&mut self, ready: &mut Option<ReadySender>) -> Result<(), DriverError> {
        let mut shutdown = self.shutdown.clone();

        // Starting
        if or_shutdown(&mut shutdown, self.navigate()).await.transpose()?.is_none() {
            return Ok(());
        }

        // Resolving
        self.set_phase(SessionPhase::Resolving);
        let established = or_shutdown(
            &mut shutdown,
            self.establish(true).instrument(child_span("establish")),
        )
        .await;

        match established {
            None => return Ok(()),
            Some(Ok(())) => {}
            Some(Err(e)) if e.is_fatal() => return Err(e),
            Some(Err(e)) => {
                warn!(error = %e, "context lost during start, recovering");
                if !self.recover(true).await? {
                    return Ok(());
                }
            }
        }

        self.set_phase(SessionPhase::Observing);
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(()));
        }

        self.observe().await
    }

    async fn observe(&mut self) -> Result<(), DriverError> {
        let period = self.config.health_check_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_ms = period.as_millis() as u64, "observing");

        let mut shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return Ok(()),

                _ = ticker.tick() => {
                    // Stop abandons an in-flight pull.
                    let checked = or_shutdown(&mut shutdown, self.health_check()).await;
                    let Some(checked) = checked else {
                        return Ok(());
                    };

                    match checked {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(error = %e, "auction context lost, recovering");
                            if !self.recover(false).await? {
                                return Ok(());
                            }
                            ticker.reset();
                        }
                    }
                }

                msg = next_console(&mut self.console) => match msg {
                    Some(msg) => self.on_console(msg),
                    None => {
                        debug!("console stream closed");
                        self.console = None;
                    }
                },
            }
        }
    }

    async fn navigate(&mut self) -> Result<(), DriverError> {
        let url = self.session.read().target.clone();

        match timeout(self.config.navigation_timeout, self.driver.goto(&url)).await {
            Ok(Ok(())) => info!(%url, "navigated to auction"),
            Ok(Err(e)) if e.is_fatal() => return Err(e),
            Ok(Err(e)) => warn!(%url, error = %e, "navigation failed, continuing on current page"),
            Err(_) => warn!(%url, "navigation timed out, continuing on current page"),
        }

        Ok(())
    }

    /// Resolve, instrument, then pull once.
    async fn establish(&mut self, initial_load: bool) -> Result<(), DriverError> {
        self.acquire().await?;
        self.pull(initial_load).await
    }

    async fn acquire(&mut self) -> Result<(), DriverError> {
        let resolution = resolver::resolve(
            &*self.driver,
            &self.profile,
            self.config.resolve_timeout,
            self.config.resolve_poll_interval,
        )
        .await?;

        let context = resolution.context().clone();
        {
            let mut s = self.session.write();
            s.resolved_context = Some(context.clone());
            s.degraded = resolution.is_degraded();
        }

        if self.console.is_none() {
            match injector::connect_console(&*self.driver, self.config.console_capacity).await {
                Ok(rx) => self.console = Some(rx),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "console subscription failed, push channel silent"),
            }
        }

        self.instrument_context(&context).await
    }

    async fn instrument_context(&mut self, context: &ContextHandle) -> Result<(), DriverError> {
        let outcome =
            injector::install(&*self.driver, context, &self.profile, &self.config).await?;

        if outcome != InstallOutcome::Installed {
            MonitorCounters::inc(&self.counters.install_failures);
        }

        Ok(())
    }

    /// Periodic pull. While degraded, first checks whether the auction frame
    /// has appeared.
    async fn health_check(&mut self) -> Result<(), DriverError> {
        if self.session.read().degraded {
            match resolver::try_resolve_once(&*self.driver, &self.profile).await {
                Ok(Some(context)) => {
                    info!(frame = %context.url, "auction frame appeared, leaving degraded mode");
                    {
                        let mut s = self.session.write();
                        s.resolved_context = Some(context.clone());
                        s.degraded = false;
                    }
                    self.instrument_context(&context).await?;
                }
                Ok(None) => debug!("auction frame still missing"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => debug!(error = %e, "frame enumeration failed"),
            }
        }

        self.pull(false).await
    }

    async fn pull(&mut self, initial_load: bool) -> Result<(), DriverError> {
        let context = self
            .session
            .read()
            .resolved_context
            .clone()
            .ok_or_else(|| DriverError::ContextDestroyed("unresolved".into()))?;

        let extraction = warn_if_slow(
            "extract",
            self.config.slow_cycle_warning,
            extractor::extract(
                &*self.driver,
                &context,
                &self.profile.fields,
                ExtractOptions::from(&self.config),
                self.store.auction_id(),
            ),
        )
        .await?;

        MonitorCounters::inc(&self.counters.pull_cycles);
        MonitorCounters::add(
            &self.counters.fields_unavailable,
            extraction.unavailable.len() as u64,
        );

        if !self.is_active() {
            debug!("session inactive, discarding pulled snapshot");
            return Ok(());
        }

        let merged = self.store.apply(&ChangeEvent::pull(&extraction.snapshot));
        self.session.write().last_reconciled_at = Some(merged.snapshot.updated_at);
        self.publish(merged, initial_load, Origin::Pull);

        Ok(())
    }

    /// Re-resolves and re-instruments until it works or the session stops.
    /// Returns `Ok(false)` when stopped first.
    async fn recover(&mut self, initial_load: bool) -> Result<bool, DriverError> {
        self.set_phase(SessionPhase::Recovering);

        let mut shutdown = self.shutdown.clone();
        let mut backoff = self.config.recovery_backoff_initial;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = or_shutdown(
                &mut shutdown,
                self.establish(initial_load).instrument(child_span("recovery")),
            )
            .await;

            match result {
                None => return Ok(false),
                Some(Ok(())) => {
                    MonitorCounters::inc(&self.counters.recoveries);
                    self.session.write().recoveries += 1;
                    info!(attempt, "recovered auction context");
                    self.set_phase(SessionPhase::Observing);
                    return Ok(true);
                }
                Some(Err(e)) if e.is_fatal() => return Err(e),
                Some(Err(e)) => {
                    MonitorCounters::inc(&self.counters.recovery_failures);
                    warn!(
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "recovery attempt failed"
                    );
                }
            }

            if or_shutdown(&mut shutdown, sleep(backoff)).await.is_none() {
                return Ok(false);
            }
            backoff = (backoff * 2).min(self.config.recovery_backoff_max);
        }
    }

    fn on_console(&mut self, msg: ConsoleMessage) {
        match injector::decode(&msg, Utc::now()) {
            Decoded::Change(event) => {
                MonitorCounters::inc(&self.counters.push_events);
                if !self.is_active() {
                    return;
                }

                let merged = self.store.apply(&event);
                if merged.changed {
                    self.publish(merged, false, Origin::Push);
                } else {
                    debug!("push event carried no new values");
                }
            }
            Decoded::Ready => debug!("page observer ready"),
            Decoded::NotSetUp { root } => warn!(%root, "page observer not set up"),
            Decoded::Ignored => MonitorCounters::inc(&self.counters.console_ignored),
            Decoded::Malformed(reason) => {
                MonitorCounters::inc(&self.counters.decode_errors);
                warn!(%reason, "dropping malformed instrumentation line");
            }
        }
    }

    fn publish(&self, merged: Merged, initial_load: bool, origin: Origin) {
        let Merged { snapshot, changed } = merged;
        let update = MonitorUpdate {
            is_monitoring: true,
            snapshot: Some(snapshot),
            changed,
            initial_load,
            origin: Some(origin),
        };

        let delivered = self.broadcaster.publish(&update);
        debug!(delivered, changed, initial_load, ?origin, "snapshot published");
    }

    /// Cleanup and final `isMonitoring = false` publish.
    async fn finish(&mut self, failure: Option<&DriverError>) {
        if failure.is_none() {
            let context = self.session.read().resolved_context.clone();
            if let Some(context) = context {
                injector::disconnect(&*self.driver, &context, &self.config).await;
            }
        }

        self.console = None;

        {
            let mut s = self.session.write();
            s.is_active = false;
            s.phase = SessionPhase::Stopped;
            s.last_error = failure.map(ToString::to_string);
        }
        Span::current().record("phase", field::display(SessionPhase::Stopped));

        self.broadcaster.publish(&MonitorUpdate {
            is_monitoring: false,
            snapshot: self.store.get(),
            changed: false,
            initial_load: false,
            origin: None,
        });

        info!("session stopped");
    }

    fn set_phase(&self, phase: SessionPhase) {
        let previous = {
            let mut s = self.session.write();
            std::mem::replace(&mut s.phase, phase)
        };

        if previous != phase {
            Span::current().record("phase", field::display(phase));
            debug!(from = %previous, to = %phase, "phase transition");
        }
    }

    fn is_active(&self) -> bool {
        self.session.read().is_active && !*self.shutdown.borrow()
    }
}
