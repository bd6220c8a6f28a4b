//! The log record: the one shape that travels the whole pipeline, from
//! tailer to wire to store to web page.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Key under which a parse failure is annotated into the record.
pub const PARSE_ERROR_KEY: &str = "Parsing error";

/// Module name carried by heartbeat records.
pub const HEARTBEAT_MODULE: &str = "Heartbeat";

/// The `parsed` field of a record: a field map conforming to the module's
/// schema, a parse-failure marker, or nothing at all. Serializes as a JSON
/// object in every case (`{}` when absent).
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// Field map produced by the module's regex + schema.
    Fields(Map<String, Value>),
    /// The line did not parse; the reason is kept with the record.
    Error(String),
    /// No parser module was applied to this record.
    Absent,
}

impl Parsed {
    /// Classify a raw JSON object into the union's arms.
    #[must_use]
    pub fn classify(map: Map<String, Value>) -> Self {
        if map.is_empty() {
            return Self::Absent;
        }
        if map.len() == 1 {
            if let Some(Value::String(reason)) = map.get(PARSE_ERROR_KEY) {
                return Self::Error(reason.clone());
            }
        }
        Self::Fields(map)
    }

    /// The record's field map, if it parsed cleanly.
    #[must_use]
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Fields(map) => Some(map),
            _ => None,
        }
    }

    /// Render as the JSON object text stored in the `parsed` column.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Serialize for Parsed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Fields(map) => map.serialize(serializer),
            Self::Error(reason) => {
                let mut m = serializer.serialize_map(Some(1))?;
                m.serialize_entry(PARSE_ERROR_KEY, reason)?;
                m.end()
            }
            Self::Absent => serializer.serialize_map(Some(0))?.end(),
        }
    }
}

impl<'de> Deserialize<'de> for Parsed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::deserialize(deserializer)?;
        Ok(Self::classify(map))
    }
}

/// One structured log record.
///
/// `host`, `timestamp` and `module` are always present; `module` may be the
/// empty string when no parser was configured for the source, and the store
/// tolerates that by upserting a `""` module row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub name: String,
    pub path: String,
    pub host: String,
    pub timestamp: i64,
    pub module: String,
    pub parsed: Parsed,
    pub raw: String,
}

/// Current unix time in seconds.
#[must_use]
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// The local machine's hostname, or `"UnknownHost"` when it cannot be read.
#[must_use]
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "UnknownHost".to_string())
}
