//! UTC timestamps as stored in the registry.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A UTC timestamp, serialized as RFC 3339.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// RFC 3339 string with second precision.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DateTime::parse_from_rfc3339(s).map(|dt| Self(dt.with_timezone(&Utc)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339())
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_yaml_roundtrip() {
        let ts: Timestamp = "2024-03-01T12:30:00Z".parse().unwrap();
        let yaml = serde_yaml::to_string(&ts).unwrap();
        let back: Timestamp = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn test_timestamp_display() {
        let ts: Timestamp = "2024-03-01T12:30:00+02:00".parse().unwrap();
        assert_eq!(ts.to_string(), "2024-03-01T10:30:00Z");
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        assert!("yesterday".parse::<Timestamp>().is_err());
    }

    #[test]
    fn test_timestamp_ordering() {
        let ts1 = Timestamp::now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let ts2 = Timestamp::now();
        assert!(ts1 < ts2);
        assert!(serde_json::to_string(&ts1).unwrap().contains('T'));
    }
}
