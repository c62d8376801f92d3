//! Per-site extraction tables.
//!
//! One engine serves every supported auction site; what differs is where the
//! live auction UI lives (nested frame or top-level document), which node the
//! page observer hangs off, and the selector table for each field.

use std::fmt;
use std::str::FromStr;

use corelib::{
    AuxiliaryMarker, FieldKey, FieldSpec, PostProcess, SelectorRule, UNKNOWN_AUCTION_ID,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    Copart,
    Iaai,
}

impl fmt::Display for SiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SiteKind::Copart => "copart",
            SiteKind::Iaai => "iaai",
        };
        f.write_str(s)
    }
}

impl FromStr for SiteKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copart" => Ok(SiteKind::Copart),
            "iaai" => Ok(SiteKind::Iaai),
            other => Err(anyhow::anyhow!("Invalid SiteKind value: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteProfile {
    pub kind: SiteKind,
    pub base_url: String,

    /// Substrings identifying the auction frame by address. Empty means the
    /// auction UI lives in the top-level document.
    pub frame_patterns: Vec<String>,

    /// Subtree the page observer watches.
    pub observer_root: String,

    /// Attribute changes the observer reacts to.
    pub observed_attributes: Vec<String>,

    /// Query parameter carrying the auction id, if the site has one.
    pub auction_id_param: Option<String>,

    pub fields: Vec<FieldSpec>,
}

impl SiteProfile {
    pub fn for_kind(kind: SiteKind) -> Self {
        match kind {
            SiteKind::Copart => Self::copart(),
            SiteKind::Iaai => Self::iaai(),
        }
    }

    /// Picks the profile from the target address. Relative targets default
    /// to Copart.
    pub fn for_target(target: &str) -> Self {
        if target.to_ascii_lowercase().contains("iaai.com") {
            Self::iaai()
        } else {
            Self::copart()
        }
    }

    pub fn copart() -> Self {
        let bid = FieldSpec::new(
            FieldKey::Bid,
            &[".current-bid", ".bid-amount", ".bid-price", r#"[data-uname*="bid"]"#],
        )
        .with_rule(SelectorRule::attribute(r#"input[name="bidAmount"]"#, "value"))
        .with_rule(SelectorRule::text(r##"text[fill="#0757ac"]"##));

        let bidder = FieldSpec::new(
            FieldKey::Bidder,
            &[".current-bidder", ".bidder-name", ".winning-bidder"],
        )
        .with_rule(SelectorRule::text(r#"text[fill="black"]"#).rejecting(&["Bid!", "$"]));

        let time_remaining = FieldSpec::new(
            FieldKey::TimeRemaining,
            &[
                ".time-remaining",
                ".countdown",
                ".time-left",
                r#"[data-uname*="time"]"#,
                ".countdown-timer",
                ".auction-timer",
                ".time-display",
                r#"[class*="countdown"]"#,
                r#"[class*="timer"]"#,
            ],
        )
        .with_auxiliary(AuxiliaryMarker::countdown_ring());

        Self {
            kind: SiteKind::Copart,
            base_url: "https://www.copart.com".into(),
            frame_patterns: vec!["g2auction.copart.com".into(), "auction".into()],
            observer_root: ".auctionrunningdiv-MACRO".into(),
            observed_attributes: vec!["value".into()],
            auction_id_param: Some("auctionDetails=".into()),
            fields: vec![
                bid,
                bidder,
                FieldSpec::new(FieldKey::Title, &[".lot-title", ".lot-desc", ".title"]),
                FieldSpec::new(FieldKey::Lot, &[".lot-number", r#"[data-uname*="lotNumber"]"#])
                    .with_post(PostProcess::LeadingInteger),
                time_remaining,
                FieldSpec::new(
                    FieldKey::ActiveBidders,
                    &[".active-bidders", ".bidder-count", ".bidders-online"],
                )
                .with_post(PostProcess::LeadingInteger),
                FieldSpec::new(
                    FieldKey::Status,
                    &[".auction-status", ".status", ".auction-state"],
                ),
            ],
        }
    }

    pub fn iaai() -> Self {
        Self {
            kind: SiteKind::Iaai,
            base_url: "https://www.iaai.com".into(),
            frame_patterns: Vec::new(),
            observer_root: "#auctionEvents".into(),
            observed_attributes: vec!["class".into(), "data-uname".into()],
            auction_id_param: None,
            fields: vec![
                FieldSpec::new(
                    FieldKey::Bid,
                    &[".bid-area__amount[data-askingamount]", ".asking-bid"],
                ),
                FieldSpec::new(FieldKey::Bidder, &[".high-bid__location", ".bidder-location"]),
                FieldSpec::new(
                    FieldKey::Title,
                    &[".run-list__item-name", ".item-name", r#"[data-bind*="ItemName"]"#],
                ),
                FieldSpec::new(
                    FieldKey::Lot,
                    &[".stock-number .data-list__value", r#"[data-bind*="StockNumber"]"#],
                )
                .with_post(PostProcess::LeadingInteger),
                FieldSpec::new(
                    FieldKey::TimeRemaining,
                    &[".run-list__timer", ".time-remaining"],
                ),
                FieldSpec::new(FieldKey::ActiveBidders, &[".bidder-count", ".active-bidders"])
                    .with_post(PostProcess::LeadingInteger),
                FieldSpec::new(FieldKey::Status, &[".run-list__state-name", ".auction-status"]),
            ],
        }
    }

    /// Absolute address for `target`; relative paths hang off the base URL.
    pub fn normalize_target(&self, target: &str) -> String {
        let target = target.trim();
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }

        let base = self.base_url.trim_end_matches('/');
        if target.starts_with('/') {
            format!("{base}{target}")
        } else {
            format!("{base}/{target}")
        }
    }

    pub fn auction_id(&self, url: &str) -> String {
        self.auction_id_param
            .as_deref()
            .and_then(|param| url.split_once(param))
            .map(|(_, rest)| rest.split(['&', '#']).next().unwrap_or_default())
            .filter(|id| !id.is_empty())
            .map_or_else(|| UNKNOWN_AUCTION_ID.to_string(), str::to_string)
    }

    /// Rank of the first pattern a nested frame's address matches. Lower is
    /// more specific; `None` means the frame is not the auction UI.
    pub fn frame_priority(&self, url: &str) -> Option<usize> {
        self.frame_patterns.iter().position(|p| url.contains(p.as_str()))
    }

    pub fn uses_frame(&self) -> bool {
        !self.frame_patterns.is_empty()
    }
}
