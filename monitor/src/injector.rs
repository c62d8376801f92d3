use adapters::instrumentation::{
    InstrumentationMessage, ObserverPlan, cleanup_script, observer_script, parse_console_line,
};
use adapters::{BrowserDriver, ConsoleMessage, ContextHandle, DriverError};
use chrono::{DateTime, Utc};
use corelib::ChangeEvent;
use tokio::sync::mpsc::{self, Receiver};
use tokio::time::timeout;
use tracing::{debug, info, instrument, trace, warn};

use crate::config::MonitorConfig;
use crate::sites::SiteProfile;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    /// Observer root absent from the context; no observation is running.
    AnchorMissing,
    /// Script could not run. Pull extraction still covers every field.
    Failed(String),
}

pub fn observer_plan(profile: &SiteProfile, cfg: &MonitorConfig) -> ObserverPlan {
    ObserverPlan {
        root: profile.observer_root.clone(),
        attributes: profile.observed_attributes.clone(),
        fields: profile.fields.clone(),
        max_elements: cfg.max_elements_per_candidate,
    }
}

/// Installs the page observer into `context`.
///
/// Only a lost context or a closed browser is an error; every other failure
/// is reported through the outcome.
#[instrument(skip_all, fields(context = %context.id, root = %profile.observer_root))]
pub async fn install<D: BrowserDriver + ?Sized>(
    driver: &D,
    context: &ContextHandle,
    profile: &SiteProfile,
    cfg: &MonitorConfig,
) -> Result<InstallOutcome, DriverError> {
    let script = match observer_script(&observer_plan(profile, cfg)) {
        Ok(script) => script,
        Err(e) => return Ok(InstallOutcome::Failed(e.to_string())),
    };

    let outcome = match timeout(cfg.script_timeout, driver.evaluate(context, &script)).await {
        Err(_) => InstallOutcome::Failed(format!("timed out after {:?}", cfg.script_timeout)),
        Ok(Err(e)) if e.interrupts_cycle() => return Err(e),
        Ok(Err(e)) => InstallOutcome::Failed(e.to_string()),
        Ok(Ok(value)) => {
            if value.get("installed").and_then(|v| v.as_bool()) == Some(true) {
                InstallOutcome::Installed
            } else {
                InstallOutcome::AnchorMissing
            }
        }
    };

    match &outcome {
        InstallOutcome::Installed => info!("page observer installed"),
        InstallOutcome::AnchorMissing => {
            warn!("observer root not found, relying on health checks only")
        }
        InstallOutcome::Failed(reason) => warn!(%reason, "page observer install failed"),
    }

    Ok(outcome)
}

/// Subscribes to the driver console. The receiver sees every page line; the
/// caller filters them through [`decode`].
pub async fn connect_console<D: BrowserDriver + ?Sized>(
    driver: &D,
    capacity: usize,
) -> Result<Receiver<ConsoleMessage>, DriverError> {
    let (tx, rx) = mpsc::channel(capacity);
    driver.subscribe_console(tx).await?;
    Ok(rx)
}

/// Best-effort observer teardown. Never fails.
pub async fn disconnect<D: BrowserDriver + ?Sized>(
    driver: &D,
    context: &ContextHandle,
    cfg: &MonitorConfig,
) {
    match timeout(cfg.script_timeout, driver.evaluate(context, &cleanup_script())).await {
        Ok(Ok(value)) => debug!(result = %value, "page observers disconnected"),
        Ok(Err(e)) => debug!(error = %e, "observer cleanup failed"),
        Err(_) => debug!("observer cleanup timed out"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Change(ChangeEvent),
    Ready,
    NotSetUp { root: String },
    /// Page noise.
    Ignored,
    Malformed(String),
}

pub fn decode(message: &ConsoleMessage, received_at: DateTime<Utc>) -> Decoded {
    match parse_console_line(&message.text) {
        Ok(Some(InstrumentationMessage::Change { update, timestamp })) => {
            Decoded::Change(ChangeEvent::push(update, timestamp.unwrap_or(received_at)))
        }
        Ok(Some(InstrumentationMessage::Ready)) => Decoded::Ready,
        Ok(Some(InstrumentationMessage::NotSetUp { root })) => Decoded::NotSetUp { root },
        Ok(None) => {
            trace!(level = %message.level, text = %message.text, "page console");
            Decoded::Ignored
        }
        Err(e) => Decoded::Malformed(format!("{e:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{FieldKey, Origin};
    use tracing_test::traced_test;

    #[test]
    fn decode_change_line() {
        let now = Utc::now();
        let Decoded::Change(event) = decode(&ConsoleMessage::log(r#"CHANGE:{"bid":"$1,300"}"#), now)
        else {
            panic!("expected change");
        };

        assert_eq!(event.origin, Origin::Push);
        assert_eq!(event.timestamp, now);
        assert_eq!(event.update.get(FieldKey::Bid), Some("$1,300"));
    }

    #[test]
    fn decode_classifies_other_lines() {
        let now = Utc::now();
        assert_eq!(decode(&ConsoleMessage::log("OBSERVER:ready"), now), Decoded::Ready);
        assert_eq!(decode(&ConsoleMessage::log("GA loaded"), now), Decoded::Ignored);
        assert!(matches!(
            decode(&ConsoleMessage::log("CHANGE:{oops"), now),
            Decoded::Malformed(_)
        ));
    }

    #[test]
    #[traced_test]
    fn ignored_lines_are_traced() {
        let msg = ConsoleMessage {
            level: "warning".into(),
            text: "Mixed Content: insecure image".into(),
        };
        assert_eq!(decode(&msg, Utc::now()), Decoded::Ignored);
        assert!(logs_contain("page console"));
        assert!(logs_contain("Mixed Content"));
    }
}
