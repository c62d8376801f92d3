use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::events::FieldUpdate;
use super::fields::FieldKey;

/// Auction id used when the target URL carries no recognisable identifier.
pub const UNKNOWN_AUCTION_ID: &str = "Unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    #[default]
    Unknown,
    Active,
    Paused,
    Ended,
}

impl AuctionStatus {
    /// Maps free-form page text onto a status, case-insensitively. Terms
    /// match whole words only, so "Inactive" is not "active".
    pub fn classify(raw: &str) -> Self {
        let text = raw.to_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        let has = |terms: &[&str]| {
            terms.iter().any(|term| {
                let term: Vec<&str> = term.split(' ').collect();
                words.windows(term.len()).any(|w| w == term.as_slice())
            })
        };

        if has(&["ended", "finished", "sold", "closed"]) {
            AuctionStatus::Ended
        } else if has(&["paused", "hold"]) {
            AuctionStatus::Paused
        } else if has(&["active", "running", "live", "on block"]) {
            AuctionStatus::Active
        } else {
            AuctionStatus::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Unknown => "unknown",
            AuctionStatus::Active => "active",
            AuctionStatus::Paused => "paused",
            AuctionStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for AuctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known state of the monitored auction.
///
/// Every field always holds a value: either something read from the page or
/// the field's sentinel (`N/A`, `0`, `unknown`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSnapshot {
    pub auction_id: String,
    pub current_bid: String,
    pub current_bidder: String,
    pub lot_title: String,
    pub lot_number: String,
    pub time_remaining: String,
    pub active_bidders: u32,
    pub status: AuctionStatus,
    pub updated_at: DateTime<Utc>,
}

impl AuctionSnapshot {
    pub fn sentinel(auction_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            auction_id: auction_id.into(),
            current_bid: FieldKey::Bid.sentinel().to_string(),
            current_bidder: FieldKey::Bidder.sentinel().to_string(),
            lot_title: FieldKey::Title.sentinel().to_string(),
            lot_number: FieldKey::Lot.sentinel().to_string(),
            time_remaining: FieldKey::TimeRemaining.sentinel().to_string(),
            active_bidders: 0,
            status: AuctionStatus::Unknown,
            updated_at: at,
        }
    }

    /// Applies every field present in `update`, leaving the rest untouched.
    ///
    /// `updated_at` always moves to `at`. Returns whether any tracked field
    /// changed value; the timestamp alone does not count.
    pub fn merge(&mut self, update: &FieldUpdate, at: DateTime<Utc>) -> bool {
        let mut changed = false;

        for (key, value) in update.iter() {
            changed |= self.set(key, value);
        }

        self.updated_at = at;
        changed
    }

    fn set(&mut self, key: FieldKey, value: &str) -> bool {
        fn replace(slot: &mut String, value: &str) -> bool {
            if slot == value {
                return false;
            }
            *slot = value.to_string();
            true
        }

        match key {
            FieldKey::Bid => replace(&mut self.current_bid, value),
            FieldKey::Bidder => replace(&mut self.current_bidder, value),
            FieldKey::Title => replace(&mut self.lot_title, value),
            FieldKey::Lot => replace(&mut self.lot_number, value),
            FieldKey::TimeRemaining => replace(&mut self.time_remaining, value),
            FieldKey::ActiveBidders => {
                let parsed = super::fields::leading_integer(value)
                    .and_then(|digits| digits.parse().ok())
                    .unwrap_or(0);
                let changed = self.active_bidders != parsed;
                self.active_bidders = parsed;
                changed
            }
            FieldKey::Status => {
                let parsed = AuctionStatus::classify(value);
                let changed = self.status != parsed;
                self.status = parsed;
                changed
            }
        }
    }

    /// Field value in its wire representation.
    pub fn value(&self, key: FieldKey) -> String {
        match key {
            FieldKey::Bid => self.current_bid.clone(),
            FieldKey::Bidder => self.current_bidder.clone(),
            FieldKey::Title => self.lot_title.clone(),
            FieldKey::Lot => self.lot_number.clone(),
            FieldKey::TimeRemaining => self.time_remaining.clone(),
            FieldKey::ActiveBidders => self.active_bidders.to_string(),
            FieldKey::Status => self.status.as_str().to_string(),
        }
    }
}
