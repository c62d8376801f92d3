use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::fields::FieldKey;
use super::snapshot::AuctionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Emitted by the injected page observer.
    Push,
    /// Produced by an explicit extraction pass.
    Pull,
}

/// Partial field map. Absent keys mean "no information", never "cleared".
///
/// Deserialization accepts the legacy key names older page scripts emitted
/// (`current_bid`, `stockNumber`, `item`, ...) as well as numbers or booleans
/// where text is expected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUpdate {
    #[serde(
        default,
        alias = "current_bid",
        alias = "asking_bid",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub bid: Option<String>,

    #[serde(
        default,
        alias = "current_bidder",
        alias = "high_bidder_location",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub bidder: Option<String>,

    #[serde(
        default,
        alias = "item",
        alias = "current_item",
        alias = "lot_title",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub title: Option<String>,

    #[serde(
        default,
        alias = "stockNumber",
        alias = "stock_number",
        alias = "lot_number",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub lot: Option<String>,

    #[serde(
        default,
        alias = "timeRemaining",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_remaining: Option<String>,

    #[serde(
        default,
        alias = "activeBidders",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub active_bidders: Option<String>,

    #[serde(
        default,
        alias = "bid_status",
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<String>,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;

    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected text value, got {other}"
        ))),
    }
}

impl FieldUpdate {
    fn slot(&self, key: FieldKey) -> &Option<String> {
        match key {
            FieldKey::Bid => &self.bid,
            FieldKey::Bidder => &self.bidder,
            FieldKey::Title => &self.title,
            FieldKey::Lot => &self.lot,
            FieldKey::TimeRemaining => &self.time_remaining,
            FieldKey::ActiveBidders => &self.active_bidders,
            FieldKey::Status => &self.status,
        }
    }

    fn slot_mut(&mut self, key: FieldKey) -> &mut Option<String> {
        match key {
            FieldKey::Bid => &mut self.bid,
            FieldKey::Bidder => &mut self.bidder,
            FieldKey::Title => &mut self.title,
            FieldKey::Lot => &mut self.lot,
            FieldKey::TimeRemaining => &mut self.time_remaining,
            FieldKey::ActiveBidders => &mut self.active_bidders,
            FieldKey::Status => &mut self.status,
        }
    }

    pub fn set(&mut self, key: FieldKey, value: impl Into<String>) {
        *self.slot_mut(key) = Some(value.into());
    }

    pub fn get(&self, key: FieldKey) -> Option<&str> {
        self.slot(key).as_deref()
    }

    /// Present fields in `FieldKey::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldKey, &str)> + '_ {
        FieldKey::ALL
            .into_iter()
            .filter_map(move |key| self.get(key).map(|v| (key, v)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Full update carrying every field of `snapshot`.
    pub fn from_snapshot(snapshot: &AuctionSnapshot) -> Self {
        let mut update = Self::default();
        for key in FieldKey::ALL {
            update.set(key, snapshot.value(key));
        }
        update
    }
}

/// Single observation headed for the snapshot store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub origin: Origin,
    pub update: FieldUpdate,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn push(update: FieldUpdate, timestamp: DateTime<Utc>) -> Self {
        Self {
            origin: Origin::Push,
            update,
            timestamp,
        }
    }

    pub fn pull(snapshot: &AuctionSnapshot) -> Self {
        Self {
            origin: Origin::Pull,
            update: FieldUpdate::from_snapshot(snapshot),
            timestamp: snapshot.updated_at,
        }
    }
}

/// Payload delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorUpdate {
    pub is_monitoring: bool,
    pub snapshot: Option<AuctionSnapshot>,
    pub changed: bool,
    pub initial_load: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
}
