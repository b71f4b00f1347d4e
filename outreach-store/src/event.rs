//! Outreach event types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which outreach action a tracked click represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutreachKind {
    /// Connection invitation
    #[serde(rename = "connect")]
    Connect,
    /// Direct message send
    #[serde(rename = "dm")]
    Message,
}

impl OutreachKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutreachKind::Connect => "connect",
            OutreachKind::Message => "dm",
        }
    }

    /// Human readable activity line, as shown in the event list
    pub fn activity(&self) -> &'static str {
        match self {
            OutreachKind::Connect => "Connect request sent",
            OutreachKind::Message => "DM sent",
        }
    }
}

impl fmt::Display for OutreachKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutreachKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connect" => Ok(OutreachKind::Connect),
            "dm" => Ok(OutreachKind::Message),
            other => Err(format!("unknown outreach kind: {}", other)),
        }
    }
}

/// Outcome recorded for a tracked action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutreachStatus {
    /// The host UI showed a durable effect (relabel, card removal)
    #[serde(rename = "confirmed")]
    Confirmed,
    /// Nothing corroborated the click before the timeout
    #[serde(rename = "clicked-only")]
    ClickedOnly,
}

impl OutreachStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutreachStatus::Confirmed => "confirmed",
            OutreachStatus::ClickedOnly => "clicked-only",
        }
    }
}

impl fmt::Display for OutreachStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutreachStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "confirmed" => Ok(OutreachStatus::Confirmed),
            "clicked-only" => Ok(OutreachStatus::ClickedOnly),
            other => Err(format!("unknown outreach status: {}", other)),
        }
    }
}

/// Name recorded for a DM logged by hand
pub const MANUAL_DM_NAME: &str = "Manual DM logged";

/// Reference URL recorded for a DM logged by hand
pub const MANUAL_DM_URL: &str = "https://www.linkedin.com/messaging/";

/// A finalized outreach action. Constructed once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutreachEvent {
    /// Click time, unix epoch milliseconds
    pub ts: i64,
    /// Absolute reference URL of the target
    pub url: String,
    /// Target display name, empty if unresolved
    pub name: String,
    pub kind: OutreachKind,
    pub status: OutreachStatus,
}

impl OutreachEvent {
    /// A DM the user reports sending outside the tracked page. The user's
    /// word is the confirmation.
    pub fn manual_dm(ts: i64) -> Self {
        Self {
            ts,
            url: MANUAL_DM_URL.to_string(),
            name: MANUAL_DM_NAME.to_string(),
            kind: OutreachKind::Message,
            status: OutreachStatus::Confirmed,
        }
    }

    /// "Sent on 18 Oct 2026 at 14:03" in local time
    pub fn sent_line(&self) -> String {
        use chrono::{Local, TimeZone};

        match Local.timestamp_millis_opt(self.ts).single() {
            Some(dt) => format!(
                "Sent on {} at {}",
                dt.format("%d %b %Y"),
                dt.format("%H:%M")
            ),
            None => "Sent (time unknown)".to_string(),
        }
    }

    /// Display name with the same fallback the event list uses
    pub fn display_name(&self) -> &str {
        let trimmed = self.name.trim();
        if trimmed.is_empty() {
            "Unknown"
        } else {
            trimmed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event() -> OutreachEvent {
        OutreachEvent {
            ts: 1_760_000_000_000,
            url: "https://www.linkedin.com/in/davepayne/".to_string(),
            name: "Dave Payne".to_string(),
            kind: OutreachKind::Connect,
            status: OutreachStatus::Confirmed,
        }
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(make_event()).unwrap();
        assert_eq!(json["kind"], "connect");
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["ts"], 1_760_000_000_000i64);

        let mut dm = make_event();
        dm.kind = OutreachKind::Message;
        dm.status = OutreachStatus::ClickedOnly;
        let json = serde_json::to_value(dm).unwrap();
        assert_eq!(json["kind"], "dm");
        assert_eq!(json["status"], "clicked-only");
    }

    #[test]
    fn test_kind_and_status_parse() {
        assert_eq!("dm".parse::<OutreachKind>().unwrap(), OutreachKind::Message);
        assert_eq!(
            "clicked-only".parse::<OutreachStatus>().unwrap(),
            OutreachStatus::ClickedOnly
        );
        assert!("follow".parse::<OutreachKind>().is_err());
    }

    #[test]
    fn test_display_name_fallback() {
        let mut event = make_event();
        assert_eq!(event.display_name(), "Dave Payne");
        event.name = "   ".to_string();
        assert_eq!(event.display_name(), "Unknown");
    }

    #[test]
    fn test_manual_dm() {
        let event = OutreachEvent::manual_dm(42);
        assert_eq!(event.kind, OutreachKind::Message);
        assert_eq!(event.name, "Manual DM logged");
        assert_eq!(event.url, "https://www.linkedin.com/messaging/");
        assert_eq!(event.kind.activity(), "DM sent");
    }

    #[test]
    fn test_sent_line() {
        let line = make_event().sent_line();
        assert!(line.starts_with("Sent on "), "got {}", line);
        assert!(line.contains(" at "));
    }
}
