use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::hat::{Action, Direction, InputEvent};

/// One line of the event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub action: Action,
    pub direction: Direction,
    pub timestamp: String,
}

impl OutputRecord {
    pub fn new(event: &InputEvent, timestamp: String) -> Self {
        Self {
            action: event.action,
            direction: event.direction,
            timestamp,
        }
    }

    /// Single-line JSON without the trailing newline
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Timezone used for record timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPolicy {
    /// RFC 3339 in UTC with a `Z` suffix, e.g. `2025-03-01T12:00:00.123456Z`
    #[default]
    Utc,
    /// RFC 3339 in host local time with an explicit offset
    Local,
}

/// Formats wall-clock instants and keeps them non-decreasing across a run
#[derive(Debug, Clone)]
pub struct Timestamper {
    policy: TimestampPolicy,
    last: Option<DateTime<Utc>>,
}

impl Timestamper {
    pub fn new(policy: TimestampPolicy) -> Self {
        Self { policy, last: None }
    }

    pub fn stamp_now(&mut self) -> String {
        self.stamp(Utc::now())
    }

    /// A wall clock stepped backwards (NTP, RTC-less boards catching up) is
    /// held at the last emitted instant.
    pub fn stamp(&mut self, now: DateTime<Utc>) -> String {
        let instant = match self.last {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last = Some(instant);

        match self.policy {
            TimestampPolicy::Utc => instant.to_rfc3339_opts(SecondsFormat::Micros, true),
            TimestampPolicy::Local => instant
                .with_timezone(&Local)
                .to_rfc3339_opts(SecondsFormat::Micros, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn fixed(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    #[test]
    fn record_has_exactly_three_string_keys() {
        let event = InputEvent::new(Action::Pressed, Direction::Up);
        let record = OutputRecord::new(&event, "2025-03-01T12:00:00.000000Z".to_string());
        let line = record.to_json_line().unwrap();
        assert!(!line.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["action"], "pressed");
        assert_eq!(object["direction"], "up");
        assert_eq!(object["timestamp"], "2025-03-01T12:00:00.000000Z");
    }

    #[test]
    fn utc_policy_uses_micros_and_z() {
        let mut stamper = Timestamper::new(TimestampPolicy::Utc);
        assert_eq!(stamper.stamp(fixed(123)), "2025-03-01T12:00:00.123000Z");
    }

    #[test]
    fn local_policy_carries_an_offset() {
        let mut stamper = Timestamper::new(TimestampPolicy::Local);
        let stamp = stamper.stamp(fixed(0));
        assert!(!stamp.ends_with('Z'));
        let parsed = DateTime::parse_from_rfc3339(&stamp).unwrap();
        assert_eq!(parsed.with_timezone(&Utc), fixed(0));
    }

    #[test]
    fn stamps_never_go_backwards() {
        let mut stamper = Timestamper::new(TimestampPolicy::Utc);
        let first = stamper.stamp(fixed(500));
        let stepped_back = stamper.stamp(fixed(100));
        let later = stamper.stamp(fixed(900));

        assert_eq!(first, stepped_back);
        assert!(first <= later);
        assert_eq!(later, "2025-03-01T12:00:00.900000Z");
    }
}
