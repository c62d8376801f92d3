use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Operational counters for one engine instance.
#[derive(Clone, Default, Debug)]
pub struct MonitorCounters {
    pub pull_cycles: Arc<AtomicU64>,
    pub push_events: Arc<AtomicU64>,

    // console side
    pub console_ignored: Arc<AtomicU64>,
    pub decode_errors: Arc<AtomicU64>,

    pub fields_unavailable: Arc<AtomicU64>,

    pub recoveries: Arc<AtomicU64>,
    pub recovery_failures: Arc<AtomicU64>,
    pub install_failures: Arc<AtomicU64>,

    // fan-out
    pub publishes: Arc<AtomicU64>,
    pub dropped_deliveries: Arc<AtomicU64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub pull_cycles: u64,
    pub push_events: u64,
    pub console_ignored: u64,
    pub decode_errors: u64,
    pub fields_unavailable: u64,
    pub recoveries: u64,
    pub recovery_failures: u64,
    pub install_failures: u64,
    pub publishes: u64,
    pub dropped_deliveries: u64,
}

impl MonitorCounters {
    pub fn snapshot(&self) -> CountersSnapshot {
        let read = |c: &Arc<AtomicU64>| c.load(Ordering::Relaxed);

        CountersSnapshot {
            pull_cycles: read(&self.pull_cycles),
            push_events: read(&self.push_events),
            console_ignored: read(&self.console_ignored),
            decode_errors: read(&self.decode_errors),
            fields_unavailable: read(&self.fields_unavailable),
            recoveries: read(&self.recoveries),
            recovery_failures: read(&self.recovery_failures),
            install_failures: read(&self.install_failures),
            publishes: read(&self.publishes),
            dropped_deliveries: read(&self.dropped_deliveries),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}
