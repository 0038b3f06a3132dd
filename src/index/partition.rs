//! Time partitions
//!
//! A partition is a fixed-size time bucket. Its key encodes the bucket start
//! and size as `<time>.<duration>`:
//!
//! ```text
//! 20240923.1d        duration >= 24h, day layout
//! 20240923T06.6h     whole hours, hour layout
//! 20240923T0630.30m  whole minutes, minute layout
//! ```

use crate::index::error::{IndexError, IndexResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

const DAY_LAYOUT: &str = "%Y%m%d";
const HOUR_LAYOUT: &str = "%Y%m%dT%H";
const MINUTE_LAYOUT: &str = "%Y%m%dT%H%M";

const SECS_PER_DAY: u64 = 24 * 60 * 60;
const SECS_PER_HOUR: u64 = 60 * 60;

/// Key of a time partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Key of the partition of the given size containing `timestamp_ms`
    pub fn new(timestamp_ms: i64, duration: Duration) -> Self {
        let start = truncate(timestamp_ms, duration);
        let time = DateTime::<Utc>::from_timestamp_millis(start).unwrap_or_default();
        Self(format!(
            "{}.{}",
            time.format(layout(duration)),
            format_duration(duration)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the key into the partition start (Unix ms) and duration
    pub fn parse(&self) -> IndexResult<(i64, Duration)> {
        let invalid = || IndexError::InvalidPartitionKey(self.0.clone());

        let (time, duration) = self.0.split_once('.').ok_or_else(invalid)?;
        let duration = parse_duration(duration).ok_or_else(invalid)?;
        let time = match layout(duration) {
            DAY_LAYOUT => NaiveDate::parse_from_str(time, DAY_LAYOUT)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
            // A bare hour is not enough for chrono to build a time.
            HOUR_LAYOUT => {
                NaiveDateTime::parse_from_str(&format!("{}00", time), MINUTE_LAYOUT).ok()
            }
            _ => NaiveDateTime::parse_from_str(time, MINUTE_LAYOUT).ok(),
        }
        .ok_or_else(invalid)?;

        Ok((time.and_utc().timestamp_millis(), duration))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PartitionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Ord for PartitionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.parse(), other.parse()) {
            (Ok((a, _)), Ok((b, _))) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for PartitionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn truncate(timestamp_ms: i64, duration: Duration) -> i64 {
    let size = duration.as_millis() as i64;
    if size <= 0 {
        return timestamp_ms;
    }
    timestamp_ms - timestamp_ms.rem_euclid(size)
}

fn layout(duration: Duration) -> &'static str {
    let secs = duration.as_secs();
    if secs >= SECS_PER_DAY && secs % SECS_PER_DAY == 0 {
        DAY_LAYOUT
    } else if secs % SECS_PER_HOUR == 0 {
        HOUR_LAYOUT
    } else {
        MINUTE_LAYOUT
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs > 0 && secs % SECS_PER_DAY == 0 {
        format!("{}d", secs / SECS_PER_DAY)
    } else if secs > 0 && secs % SECS_PER_HOUR == 0 {
        format!("{}h", secs / SECS_PER_HOUR)
    } else {
        format!("{}m", secs / 60)
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let unit = match s.chars().last()? {
        'd' => SECS_PER_DAY,
        'h' => SECS_PER_HOUR,
        'm' => 60,
        _ => return None,
    };
    let n: u64 = s[..s.len() - 1].parse().ok()?;
    if n == 0 {
        return None;
    }
    Some(Duration::from_secs(n.checked_mul(unit)?))
}

/// Metadata of a time partition: its interval and the tenants with data in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMeta {
    key: PartitionKey,
    timestamp: i64,
    duration: Duration,
    /// Sorted, without duplicates
    tenants: Vec<String>,
}

impl PartitionMeta {
    /// Metadata of the partition of the given size containing `timestamp_ms`
    pub fn for_timestamp(timestamp_ms: i64, duration: Duration) -> Self {
        Self {
            key: PartitionKey::new(timestamp_ms, duration),
            timestamp: truncate(timestamp_ms, duration),
            duration,
            tenants: Vec::new(),
        }
    }

    /// Reconstruct partition metadata from a stored key
    pub fn from_key(key: PartitionKey) -> IndexResult<Self> {
        let (timestamp, duration) = key.parse()?;
        Ok(Self {
            key,
            timestamp,
            duration,
            tenants: Vec::new(),
        })
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// Partition start (Unix ms)
    pub fn start_time(&self) -> i64 {
        self.timestamp
    }

    /// Partition end (Unix ms), exclusive
    pub fn end_time(&self) -> i64 {
        self.timestamp + self.duration.as_millis() as i64
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Tenants with data in the partition, sorted
    pub fn tenants(&self) -> &[String] {
        &self.tenants
    }

    pub fn has_tenant(&self, tenant: &str) -> bool {
        self.tenants
            .binary_search_by(|t| t.as_str().cmp(tenant))
            .is_ok()
    }

    /// Add a tenant; adding a known tenant is a no-op
    pub fn add_tenant(&mut self, tenant: &str) {
        if let Err(i) = self.tenants.binary_search_by(|t| t.as_str().cmp(tenant)) {
            self.tenants.insert(i, tenant.to_string());
        }
    }

    /// Replace the tenant list (duplicates are dropped)
    pub fn set_tenants<I: IntoIterator<Item = String>>(&mut self, tenants: I) {
        self.tenants = tenants.into_iter().collect();
        self.tenants.sort();
        self.tenants.dedup();
    }

    /// Whether `[start, end]` touches the partition: `start < end_time && end >= start_time`
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        start < self.end_time() && end >= self.timestamp
    }

    /// Whether the instant falls within `[start_time, end_time)`
    pub fn contains(&self, t: i64) -> bool {
        t >= self.timestamp && t < self.end_time()
    }
}
