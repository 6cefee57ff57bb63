//! Windowed on-time statistics and running counters.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{FsInfo, Interval, Record, RunningCounters};

// ---

/// Answers on-time queries and keeps the point counters.
#[derive(Debug, Clone, Default)]
pub struct StatsAggregator {
    counters: RunningCounters,
}

impl StatsAggregator {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more processed record.
    pub fn observe(&mut self, record: &Record) {
        self.counters.observe(record);
    }

    /// Recompute the counters from the full record stream.
    pub fn recompute<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) {
        self.counters = RunningCounters::from_records(records);
    }

    pub fn counters(&self) -> RunningCounters {
        self.counters
    }

    /// Total relay on-time inside `[start, end]`.
    ///
    /// `intervals` must be ascending by `from`; the scan stops at the first
    /// interval starting after `end`. An open interval counts up to `end`.
    pub fn on_time_within(&self, intervals: &[Interval], start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
        // ---
        let mut total = Duration::zero();

        for interval in intervals {
            if interval.from > end {
                break;
            }
            let to = interval.to.map_or(end, |to| to.min(end));
            let from = interval.from.max(start);
            if to > from {
                total += to - from;
            }
        }
        total
    }
}

/// Device bytes per log file block.
const FILE_BLOCK_BYTES: u64 = 8192;
/// Usable record bytes per file.
const FILE_PAYLOAD_BYTES: f64 = 8190.0;

/// How long the controller can keep logging before its storage fills up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageEstimate {
    /// Time covered by one full log file.
    pub file_span_secs: i64,
    /// Time until storage is exhausted at the current logging rate.
    pub time_left_secs: i64,
}

impl StorageEstimate {
    // ---
    /// `log_period_secs` is the controller's record-writing period.
    pub fn compute(fs: FsInfo, sensor_count: usize, log_period_secs: u64, counters: RunningCounters) -> Self {
        // ---
        let events_fraction = if counters.total_points > 0 {
            counters.event_points as f64 / counters.total_points as f64
        } else {
            0.1
        };

        // comma + brackets + packed time, 4 per reading, event tag share
        let record_bytes = 1.0 + 2.0 + 10.0 + 4.0 * sensor_count as f64 + 5.5 * events_fraction;
        let records_per_file = (FILE_PAYLOAD_BYTES / record_bytes).floor() as i64;
        let files_left = (fs.tot.saturating_sub(fs.used) / FILE_BLOCK_BYTES) as i64;

        let file_span_secs = records_per_file.saturating_mul(log_period_secs as i64);
        Self {
            file_span_secs,
            time_left_secs: files_left.saturating_mul(file_span_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::EventTag;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn closed(from: i64, to: i64) -> Interval {
        Interval {
            from: at(from),
            last_seen: at(to),
            to: Some(at(to)),
        }
    }

    fn open(from: i64, last_seen: i64) -> Interval {
        Interval {
            from: at(from),
            last_seen: at(last_seen),
            to: None,
        }
    }

    #[test]
    fn test_window_clipping_closed_intervals() {
        // ---
        let stats = StatsAggregator::new();
        let intervals = [closed(100, 200), closed(300, 400)];

        assert_eq!(stats.on_time_within(&intervals, at(150), at(350)), Duration::seconds(100));
        assert_eq!(stats.on_time_within(&intervals, at(0), at(100)), Duration::zero());
        assert_eq!(stats.on_time_within(&intervals, at(250), at(260)), Duration::zero());
        assert_eq!(stats.on_time_within(&intervals, at(0), at(1000)), Duration::seconds(200));
    }

    #[test]
    fn test_open_interval_counts_up_to_window_end() {
        // ---
        let stats = StatsAggregator::new();
        let intervals = [closed(100, 200), open(300, 380)];

        assert_eq!(stats.on_time_within(&intervals, at(150), at(350)), Duration::seconds(100));
        assert_eq!(stats.on_time_within(&intervals, at(0), at(500)), Duration::seconds(300));
        assert_eq!(stats.on_time_within(&intervals, at(250), at(260)), Duration::zero());
    }

    #[test]
    fn test_window_inside_single_interval() {
        // ---
        let stats = StatsAggregator::new();
        let intervals = [closed(100, 400)];

        assert_eq!(stats.on_time_within(&intervals, at(200), at(210)), Duration::seconds(10));
    }

    #[test]
    fn test_counters_recompute_matches_incremental() {
        // ---
        let records: Vec<Record> = [EventTag::Reading, EventTag::RelayOn, EventTag::Reading, EventTag::RelayOff]
            .into_iter()
            .enumerate()
            .map(|(i, event)| Record {
                timestamp: at(i as i64 * 60),
                readings: vec![1],
                event,
            })
            .collect();

        let mut incremental = StatsAggregator::new();
        records.iter().for_each(|r| incremental.observe(r));

        let mut full = StatsAggregator::new();
        full.recompute(&records);

        assert_eq!(incremental.counters(), full.counters());
        assert_eq!(full.counters().total_points, 4);
        assert_eq!(full.counters().event_points, 2);
    }

    #[test]
    fn test_storage_estimate() {
        // ---
        let fs = FsInfo {
            tot: 10 * 8192 + 100,
            used: 0,
            block: 8192,
            page: 256,
        };
        let counters = RunningCounters {
            total_points: 10,
            event_points: 0,
        };

        // 2 sensors, no events: 21 bytes per record, 390 records per file
        let estimate = StorageEstimate::compute(fs, 2, 600, counters);
        assert_eq!(estimate.file_span_secs, 390 * 600);
        assert_eq!(estimate.time_left_secs, 10 * 390 * 600);
    }

    #[test]
    fn test_storage_estimate_full_device() {
        // ---
        let fs = FsInfo {
            tot: 8192,
            used: 9000,
            ..FsInfo::default()
        };
        let estimate = StorageEstimate::compute(fs, 1, 600, RunningCounters::default());
        assert_eq!(estimate.time_left_secs, 0);
    }
}
