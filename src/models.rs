//! Data models for the controller sync engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::RecordFormatError;

// ---

/// What a record represents, decided once when the raw line is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    Reading,
    RelayOn,
    RelayOff,
    Boot,
}

impl EventTag {
    // ---
    /// Map a trailing wire token onto a tag.
    pub fn from_wire(token: &str) -> Result<Self, RecordFormatError> {
        // ---
        match token {
            "t" => Ok(Self::Reading),
            "on" => Ok(Self::RelayOn),
            "off" => Ok(Self::RelayOff),
            "st" => Ok(Self::Boot),
            other => Err(RecordFormatError::UnknownTag(other.to_string())),
        }
    }

    /// Trailing wire token, `None` for plain readings (they carry no tag).
    pub fn wire_tag(self) -> Option<&'static str> {
        // ---
        match self {
            Self::Reading => None,
            Self::RelayOn => Some("on"),
            Self::RelayOff => Some("off"),
            Self::Boot => Some("st"),
        }
    }

    pub fn is_event(self) -> bool {
        self != Self::Reading
    }
}

/// One element of a raw record array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Number(i64),
    Text(String),
}

/// One observation or event from the controller log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    // ---
    pub timestamp: DateTime<Utc>,
    /// Sensor values in tenths of a unit, one per configured sensor.
    pub readings: Vec<i32>,
    pub event: EventTag,
}

/// Identity of a record inside the cache.
pub type RecordKey = (DateTime<Utc>, EventTag);

impl Record {
    // ---
    pub fn key(&self) -> RecordKey {
        (self.timestamp, self.event)
    }
}

/// A log file resident on the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    // ---
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "s", default)]
    pub size_bytes: u64,
}

/// Sort key of a remote file: `(date, part, name)`.
///
/// Names look like `yy_m_d` or `yy_m_d_part`, possibly behind a directory
/// prefix. Names that do not parse sort first, by name.
pub type FileSortKey = (Option<(u32, u32, u32)>, u32, String);

impl RemoteFile {
    // ---
    pub fn sort_key(&self) -> FileSortKey {
        // ---
        let base = self.name.rsplit('/').next().unwrap_or(&self.name);
        let parts: Vec<&str> = base.split('_').collect();

        let date = match parts.as_slice() {
            [y, m, d, ..] => match (y.parse(), m.parse(), d.parse()) {
                (Ok(y), Ok(m), Ok(d)) => Some((y, m, d)),
                _ => None,
            },
            _ => None,
        };
        let part = parts.get(3).and_then(|p| p.parse().ok()).unwrap_or(0);

        (date, part, self.name.clone())
    }
}

/// Sort a file index oldest-first by the date embedded in each name.
pub fn sort_file_index(files: &mut [RemoteFile]) {
    files.sort_by_cached_key(RemoteFile::sort_key);
}

/// A span during which the relay was on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interval {
    // ---
    pub from: DateTime<Utc>,
    /// Latest moment the relay is known to have been on.
    pub last_seen: DateTime<Utc>,
    /// Closing moment, `None` while the relay is still on.
    pub to: Option<DateTime<Utc>>,
}

impl Interval {
    // ---
    pub fn is_open(&self) -> bool {
        self.to.is_none()
    }
}

/// Running totals over every cached record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunningCounters {
    pub total_points: u64,
    pub event_points: u64,
}

impl RunningCounters {
    // ---
    pub fn observe(&mut self, record: &Record) {
        // ---
        self.total_points += 1;
        if record.event.is_event() {
            self.event_points += 1;
        }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        // ---
        let mut counters = Self::default();
        for record in records {
            counters.observe(record);
        }
        counters
    }
}

/// Controller-side configuration (`conf` of `/conf`). Periods are seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    // ---
    /// Low temperature threshold.
    pub tl: i64,
    /// High temperature threshold.
    pub th: i64,
    /// Minimum relay on-time.
    pub ton: u64,
    /// Minimum relay off-time.
    pub toff: u64,
    /// Sensor read period, also the live poll period.
    pub read: u64,
    /// Period between records written to the log.
    pub log: u64,
    /// Period between log buffer flushes to storage.
    pub flush: u64,
    #[serde(deserialize_with = "flag_from_any", default)]
    pub blink: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            tl: 2,
            th: 5,
            ton: 10,
            toff: 10,
            read: 180,
            log: 1800,
            flush: 7200,
            blink: true,
        }
    }
}

/// Controller storage usage in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsInfo {
    pub tot: u64,
    pub used: u64,
    #[serde(default)]
    pub block: u64,
    #[serde(default)]
    pub page: u64,
}

/// A configured temperature sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sensor {
    pub addr: Vec<String>,
    pub weight: u32,
}

/// Parse the controller's `sn` sensor list: `"a1 a2 … weight,b1 b2 … weight"`.
pub fn parse_sensors(sn: &str) -> Vec<Sensor> {
    // ---
    sn.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let mut addr: Vec<String> = entry.split_whitespace().map(String::from).collect();
            let weight = addr.pop().and_then(|w| w.parse().ok()).unwrap_or(10);
            Sensor { addr, weight }
        })
        .collect()
}

/// Full controller state as returned by `/conf`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerState {
    // ---
    #[serde(default)]
    pub conf: DeviceConfig,
    #[serde(default)]
    pub fs: FsInfo,
    #[serde(rename = "sn", default)]
    pub sensor_list: String,
    #[serde(rename = "dt", default)]
    pub files: Vec<RemoteFile>,
    #[serde(rename = "rel", deserialize_with = "optional_flag", default)]
    pub relay_on: Option<bool>,
}

impl ControllerState {
    // ---
    pub fn sensors(&self) -> Vec<Sensor> {
        parse_sensors(&self.sensor_list)
    }
}

/// Payload of `/info`: either the current reading or everything since the
/// last log flush.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfoPayload {
    // ---
    #[serde(default)]
    pub cur: Option<serde_json::Value>,
    #[serde(default)]
    pub last: Option<Vec<serde_json::Value>>,
    #[serde(default, deserialize_with = "optional_flag")]
    pub rel: Option<bool>,
    #[serde(default)]
    pub up: u64,
    #[serde(default)]
    pub avg: f64,
}

/// Latest live view of the controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveStatus {
    pub relay_on: Option<bool>,
    pub uptime_secs: u64,
    pub avg: f64,
    /// Current sensor values, tenths of a unit.
    pub sensors: Vec<i32>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ---

fn flag_from_value(value: &serde_json::Value) -> Option<bool> {
    // ---
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::Number(n) => n.as_i64().map(|n| n != 0),
        serde_json::Value::String(s) => Some(s != "0" && !s.is_empty()),
        _ => None,
    }
}

fn flag_from_any<'de, D: Deserializer<'de>>(de: D) -> Result<bool, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(flag_from_value(&value).unwrap_or(false))
}

fn optional_flag<'de, D: Deserializer<'de>>(de: D) -> Result<Option<bool>, D::Error> {
    let value = serde_json::Value::deserialize(de)?;
    Ok(flag_from_value(&value))
}
