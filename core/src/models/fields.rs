use std::fmt;

use serde::{Deserialize, Serialize};

/// Tracked auction fields.
///
/// The serde names double as the keys of the instrumentation wire format
/// (`CHANGE:{"bid":"$1,300"}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Bid,
    Bidder,
    Title,
    Lot,
    TimeRemaining,
    ActiveBidders,
    Status,
}

impl FieldKey {
    pub const ALL: [FieldKey; 7] = [
        FieldKey::Bid,
        FieldKey::Bidder,
        FieldKey::Title,
        FieldKey::Lot,
        FieldKey::TimeRemaining,
        FieldKey::ActiveBidders,
        FieldKey::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKey::Bid => "bid",
            FieldKey::Bidder => "bidder",
            FieldKey::Title => "title",
            FieldKey::Lot => "lot",
            FieldKey::TimeRemaining => "time_remaining",
            FieldKey::ActiveBidders => "active_bidders",
            FieldKey::Status => "status",
        }
    }

    /// Placeholder stored when no candidate resolves the field.
    pub fn sentinel(&self) -> &'static str {
        match self {
            FieldKey::ActiveBidders => "0",
            FieldKey::Status => "unknown",
            _ => NOT_AVAILABLE,
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const NOT_AVAILABLE: &str = "N/A";

/// Transformation applied to a raw value read from the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcess {
    #[default]
    Trim,
    LeadingInteger,
}

impl PostProcess {
    /// Returns `None` when nothing usable remains (blank text, no digits).
    pub fn apply(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        match self {
            PostProcess::Trim => Some(trimmed.to_string()),
            PostProcess::LeadingInteger => leading_integer(trimmed).map(str::to_string),
        }
    }
}

/// First run of ASCII digits in `text`, e.g. `"Stock #: 40123 (A)"` -> `"40123"`.
pub fn leading_integer(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

/// One candidate locator for a field.
///
/// With `attribute` set the named attribute is read first and the element text
/// is used when the attribute is missing or blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRule {
    pub selector: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,

    /// Values equal to or containing any of these tokens are skipped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reject: Vec<String>,
}

impl SelectorRule {
    pub fn text(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attribute: None,
            reject: Vec::new(),
        }
    }

    pub fn attribute(selector: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attribute: Some(name.into()),
            reject: Vec::new(),
        }
    }

    pub fn rejecting(mut self, tokens: &[&str]) -> Self {
        self.reject.extend(tokens.iter().map(|t| t.to_string()));
        self
    }

    pub fn accepts(&self, value: &str) -> bool {
        !self
            .reject
            .iter()
            .any(|token| value == token || value.contains(token.as_str()))
    }
}

/// Secondary structural probe used once the primary candidates are exhausted.
///
/// Some pages draw the countdown as positioned SVG markup: a `marker` element
/// carrying geometry attributes inside a container whose text holds the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryMarker {
    pub marker: String,
    pub required_attributes: Vec<String>,
    pub container: String,
    pub keyword: String,
}

impl AuxiliaryMarker {
    /// Countdown ring: `<circle cx cy r>` inside a `countdown`/`timer` container.
    pub fn countdown_ring() -> Self {
        Self {
            marker: "circle".into(),
            required_attributes: vec!["cx".into(), "cy".into(), "r".into()],
            container: r#"[class*="countdown"], [class*="timer"]"#.into(),
            keyword: "time".into(),
        }
    }
}

/// Static extraction recipe for one tracked field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: FieldKey,
    pub candidates: Vec<SelectorRule>,

    #[serde(default)]
    pub post: PostProcess,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<AuxiliaryMarker>,
}

impl FieldSpec {
    pub fn new(key: FieldKey, selectors: &[&str]) -> Self {
        Self {
            key,
            candidates: selectors.iter().map(|s| SelectorRule::text(*s)).collect(),
            post: PostProcess::Trim,
            auxiliary: None,
        }
    }

    pub fn with_rule(mut self, rule: SelectorRule) -> Self {
        self.candidates.push(rule);
        self
    }

    pub fn with_post(mut self, post: PostProcess) -> Self {
        self.post = post;
        self
    }

    pub fn with_auxiliary(mut self, marker: AuxiliaryMarker) -> Self {
        self.auxiliary = Some(marker);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_integer_takes_first_digit_run() {
        assert_eq!(leading_integer("12 bidders online"), Some("12"));
        assert_eq!(leading_integer("Stock #: 40123 (A)"), Some("40123"));
        assert_eq!(leading_integer("no digits"), None);
    }

    #[test]
    fn post_process_rejects_blank_values() {
        assert_eq!(PostProcess::Trim.apply("   \n"), None);
        assert_eq!(PostProcess::Trim.apply("  $1,250 "), Some("$1,250".into()));
        assert_eq!(PostProcess::LeadingInteger.apply("Bidders: 7"), Some("7".into()));
        assert_eq!(PostProcess::LeadingInteger.apply("none"), None);
    }

    #[test]
    fn rejecting_rule_skips_tokens() {
        let rule = SelectorRule::text(r#"text[fill="black"]"#).rejecting(&["Bid!", "$"]);
        assert!(!rule.accepts("Bid!"));
        assert!(!rule.accepts("$1,300"));
        assert!(rule.accepts("CA - Sacramento"));
    }

    #[test]
    fn sentinels_are_field_specific() {
        assert_eq!(FieldKey::Bid.sentinel(), "N/A");
        assert_eq!(FieldKey::ActiveBidders.sentinel(), "0");
        assert_eq!(FieldKey::Status.sentinel(), "unknown");
    }

    #[test]
    fn field_keys_serialize_as_wire_names() {
        for key in FieldKey::ALL {
            let json = serde_json::to_string(&key).unwrap();
            assert_eq!(json, format!("\"{}\"", key.as_str()));
        }
    }
}
