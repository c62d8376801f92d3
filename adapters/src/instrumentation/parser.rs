//! Tagged console-line decoder for the injected page observer.
//!
//! The observer talks to the engine through the page console, one line per
//! message:
//!
//! ```text
//! CHANGE:{"bid":"$1,300","bidder":"CA-123","timestamp":"2024-05-01T17:02:11.000Z"}
//! OBSERVER:ready
//! OBSERVER:not-set-up .auctionrunningdiv-MACRO
//! ```
//!
//! Anything without one of the two exact prefixes is page noise and yields
//! `Ok(None)`. A tagged line with a broken payload is an error.

use anyhow::{Context, bail};
use chrono::{DateTime, TimeZone, Utc};
use corelib::FieldUpdate;
use serde_json::Value;

use super::script::{CHANGE_TAG, NOTICE_TAG};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentationMessage {
    Change {
        update: FieldUpdate,
        /// Observer-side time of the change, when the payload carried one.
        timestamp: Option<DateTime<Utc>>,
    },
    Ready,
    NotSetUp {
        root: String,
    },
}

pub fn parse_console_line(raw: &str) -> anyhow::Result<Option<InstrumentationMessage>> {
    if let Some(payload) = raw.strip_prefix(CHANGE_TAG) {
        return parse_change(payload).map(Some);
    }

    if let Some(notice) = raw.strip_prefix(NOTICE_TAG) {
        let notice = notice.trim();
        if notice == "ready" {
            return Ok(Some(InstrumentationMessage::Ready));
        }
        if let Some(root) = notice.strip_prefix("not-set-up") {
            return Ok(Some(InstrumentationMessage::NotSetUp {
                root: root.trim().to_string(),
            }));
        }
        // Unknown notice from a newer script.
        return Ok(None);
    }

    Ok(None)
}

fn parse_change(payload: &str) -> anyhow::Result<InstrumentationMessage> {
    let mut json: Value =
        serde_json::from_str(payload.trim()).context("change payload is not valid JSON")?;

    let Some(map) = json.as_object_mut() else {
        bail!("change payload must be a JSON object");
    };

    let timestamp = map.remove("timestamp").and_then(parse_timestamp);
    let update: FieldUpdate = serde_json::from_value(json).context("change payload fields")?;

    Ok(InstrumentationMessage::Change { update, timestamp })
}

fn parse_timestamp(value: Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
