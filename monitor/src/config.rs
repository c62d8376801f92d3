use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorConfig {
    // =========================
    // Reconciliation
    // =========================
    /// Period of the pull-side health check.
    ///
    /// This is the upper bound on snapshot staleness: even if the page
    /// observer dies silently, a fresh extraction is published at least this
    /// often.
    pub health_check_interval: Duration,

    /// Warn when a single extraction pass takes longer than this.
    pub slow_cycle_warning: Duration,

    // =========================
    // Context resolution
    // =========================
    /// How long to wait for the auction frame before falling back to the
    /// top-level document.
    pub resolve_timeout: Duration,

    /// Delay between frame enumerations while waiting.
    pub resolve_poll_interval: Duration,

    // =========================
    // Extraction
    // =========================
    /// Visibility wait for one located element.
    pub probe_timeout: Duration,

    /// Visibility wait for auxiliary markers (countdown rings and the like).
    pub auxiliary_probe_timeout: Duration,

    /// Total time one candidate selector may spend on all its elements.
    pub candidate_budget: Duration,

    /// Elements inspected per candidate selector before moving on.
    pub max_elements_per_candidate: usize,

    // =========================
    // Driver calls
    // =========================
    /// Bound on observer install and cleanup scripts.
    pub script_timeout: Duration,

    pub navigation_timeout: Duration,

    // =========================
    // Recovery
    // =========================
    /// First wait after a failed recovery attempt. Doubles per failure.
    pub recovery_backoff_initial: Duration,

    pub recovery_backoff_max: Duration,

    // =========================
    // Lifecycle
    // =========================
    /// How long `start` waits for the first snapshot before giving up.
    pub start_timeout: Duration,

    /// How long `stop` waits for the session task to wind down before
    /// aborting it.
    pub stop_timeout: Duration,

    // =========================
    // Channels
    // =========================
    /// Buffer per subscriber. A full buffer drops that delivery.
    pub subscriber_capacity: usize,

    /// Buffer between the driver console and the decoder.
    pub console_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            slow_cycle_warning: Duration::from_secs(10),
            resolve_timeout: Duration::from_secs(10),
            resolve_poll_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(1),
            auxiliary_probe_timeout: Duration::from_millis(500),
            candidate_budget: Duration::from_secs(3),
            max_elements_per_candidate: 8,
            script_timeout: Duration::from_secs(5),
            navigation_timeout: Duration::from_secs(60),
            recovery_backoff_initial: Duration::from_secs(2),
            recovery_backoff_max: Duration::from_secs(60),
            start_timeout: Duration::from_secs(90),
            stop_timeout: Duration::from_secs(5),
            subscriber_capacity: 64,
            console_capacity: 256,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Missing keys keep the
    /// default; unparseable ones keep it too, with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let secs = |key: &str, default: Duration| {
            read::<u64, _>(&lookup, key).map_or(default, Duration::from_secs)
        };
        let millis = |key: &str, default: Duration| {
            read::<u64, _>(&lookup, key).map_or(default, Duration::from_millis)
        };
        let count = |key: &str, default: usize| match read::<usize, _>(&lookup, key) {
            Some(0) => {
                warn!(key, "zero is not a usable count, keeping default");
                default
            }
            Some(n) => n,
            None => default,
        };

        Self {
            health_check_interval: secs("MONITOR_HEALTH_CHECK_SECS", d.health_check_interval),
            slow_cycle_warning: millis("MONITOR_SLOW_CYCLE_MS", d.slow_cycle_warning),
            resolve_timeout: millis("MONITOR_RESOLVE_TIMEOUT_MS", d.resolve_timeout),
            resolve_poll_interval: millis("MONITOR_RESOLVE_POLL_MS", d.resolve_poll_interval),
            probe_timeout: millis("MONITOR_PROBE_TIMEOUT_MS", d.probe_timeout),
            auxiliary_probe_timeout: millis(
                "MONITOR_AUX_PROBE_TIMEOUT_MS",
                d.auxiliary_probe_timeout,
            ),
            candidate_budget: millis("MONITOR_CANDIDATE_BUDGET_MS", d.candidate_budget),
            max_elements_per_candidate: count("MONITOR_MAX_ELEMENTS", d.max_elements_per_candidate),
            script_timeout: millis("MONITOR_SCRIPT_TIMEOUT_MS", d.script_timeout),
            navigation_timeout: millis("MONITOR_NAVIGATION_TIMEOUT_MS", d.navigation_timeout),
            recovery_backoff_initial: millis(
                "MONITOR_RECOVERY_BACKOFF_MS",
                d.recovery_backoff_initial,
            ),
            recovery_backoff_max: millis("MONITOR_RECOVERY_BACKOFF_MAX_MS", d.recovery_backoff_max),
            start_timeout: secs("MONITOR_START_TIMEOUT_SECS", d.start_timeout),
            stop_timeout: millis("MONITOR_STOP_TIMEOUT_MS", d.stop_timeout),
            subscriber_capacity: count("MONITOR_SUBSCRIBER_CAPACITY", d.subscriber_capacity),
            console_capacity: count("MONITOR_CONSOLE_CAPACITY", d.console_capacity),
        }
    }
}

fn read<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tracing_test::traced_test;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(MonitorConfig::from_lookup(|_| None), MonitorConfig::default());
    }

    #[test]
    fn overrides_are_applied_with_units() {
        let cfg = MonitorConfig::from_lookup(lookup(&[
            ("MONITOR_HEALTH_CHECK_SECS", "5"),
            ("MONITOR_PROBE_TIMEOUT_MS", "250"),
            ("MONITOR_MAX_ELEMENTS", "3"),
        ]));

        assert_eq!(cfg.health_check_interval, Duration::from_secs(5));
        assert_eq!(cfg.probe_timeout, Duration::from_millis(250));
        assert_eq!(cfg.max_elements_per_candidate, 3);
        assert_eq!(cfg.resolve_timeout, Duration::from_secs(10));
    }

    #[test]
    #[traced_test]
    fn garbage_falls_back_to_default() {
        let cfg = MonitorConfig::from_lookup(lookup(&[
            ("MONITOR_HEALTH_CHECK_SECS", "thirty"),
            ("MONITOR_SUBSCRIBER_CAPACITY", "0"),
        ]));

        assert_eq!(cfg.health_check_interval, Duration::from_secs(30));
        assert_eq!(cfg.subscriber_capacity, 64);
        assert!(logs_contain("ignoring unparseable config value"));
        assert!(logs_contain("MONITOR_HEALTH_CHECK_SECS"));
    }
}
