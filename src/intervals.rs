//! Relay-on interval reconstruction from the record stream.
//!
//! A single forward pass over records. The relay state is carried between
//! calls, so feeding the stream in consecutive batches (cache replay, then
//! one batch per live poll) ends in the same intervals as feeding it whole.

use chrono::{DateTime, Utc};

use crate::models::{EventTag, Interval, Record};

// ---

/// State carried from one batch to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayState {
    pub relay_on: bool,
}

/// Derives relay-on [`Interval`]s and boot markers from records.
#[derive(Debug, Clone)]
pub struct IntervalReconstructor {
    close_on_boot: bool,
    state: RelayState,
    intervals: Vec<Interval>,
    boots: Vec<DateTime<Utc>>,
}

impl IntervalReconstructor {
    // ---
    /// `close_on_boot` closes an open interval at a boot marker; the relay
    /// is then considered off until the next explicit "on".
    pub fn new(close_on_boot: bool) -> Self {
        Self {
            close_on_boot,
            state: RelayState::default(),
            intervals: Vec::new(),
            boots: Vec::new(),
        }
    }

    /// Forget everything, ready for a full replay.
    pub fn reset(&mut self) {
        // ---
        self.state = RelayState::default();
        self.intervals.clear();
        self.boots.clear();
    }

    /// Consume the next batch of records, in stream order.
    pub fn feed<'a>(&mut self, records: impl IntoIterator<Item = &'a Record>) {
        // ---
        for record in records {
            self.step(record);
        }
    }

    fn step(&mut self, record: &Record) {
        // ---
        let ts = record.timestamp;

        match record.event {
            EventTag::RelayOn => {
                if self.state.relay_on {
                    self.extend_open(ts);
                } else {
                    self.intervals.push(Interval {
                        from: ts,
                        last_seen: ts,
                        to: None,
                    });
                }
                self.state.relay_on = true;
            }
            EventTag::RelayOff => {
                self.close_open(ts);
                self.state.relay_on = false;
            }
            EventTag::Boot => {
                self.boots.push(ts);
                if self.state.relay_on && self.close_on_boot {
                    self.close_open(ts);
                    self.state.relay_on = false;
                }
            }
            EventTag::Reading => {
                if self.state.relay_on {
                    self.extend_open(ts);
                }
            }
        }
    }

    fn open_interval(&mut self) -> Option<&mut Interval> {
        self.intervals.last_mut().filter(|i| i.is_open())
    }

    fn extend_open(&mut self, ts: DateTime<Utc>) {
        // ---
        if let Some(open) = self.open_interval() {
            open.last_seen = open.last_seen.max(ts);
        }
    }

    fn close_open(&mut self, ts: DateTime<Utc>) {
        // ---
        if let Some(open) = self.open_interval() {
            open.last_seen = open.last_seen.max(ts);
            open.to = Some(ts);
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// All intervals, ascending by `from`. At most the last one is open.
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// The interval still running at the end of the stream, if any.
    pub fn ongoing(&self) -> Option<&Interval> {
        self.intervals.last().filter(|i| i.is_open())
    }

    pub fn boots(&self) -> &[DateTime<Utc>] {
        &self.boots
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn rec(secs: i64, event: EventTag) -> Record {
        Record {
            timestamp: at(secs),
            readings: vec![],
            event,
        }
    }

    fn stream() -> Vec<Record> {
        use EventTag::*;
        vec![
            rec(0, Reading),
            rec(100, RelayOn),
            rec(150, Reading),
            rec(200, RelayOff),
            rec(250, Reading),
            rec(300, RelayOn),
            rec(320, RelayOn),
            rec(350, Reading),
            rec(400, Boot),
            rec(450, Reading),
            rec(500, RelayOn),
            rec(560, Reading),
        ]
    }

    #[test]
    fn test_on_off_pairs_become_intervals() {
        // ---
        let mut r = IntervalReconstructor::new(true);
        r.feed(&stream());

        let intervals = r.intervals();
        assert_eq!(intervals.len(), 3);

        assert_eq!(intervals[0].from, at(100));
        assert_eq!(intervals[0].to, Some(at(200)));

        // duplicate "on" extends, boot closes
        assert_eq!(intervals[1].from, at(300));
        assert_eq!(intervals[1].to, Some(at(400)));

        // still running at end of stream
        assert_eq!(intervals[2].from, at(500));
        assert_eq!(intervals[2].to, None);
        assert_eq!(intervals[2].last_seen, at(560));
        assert_eq!(r.ongoing(), Some(&intervals[2]));
        assert!(r.state().relay_on);
        assert_eq!(r.boots(), &[at(400)]);
    }

    #[test]
    fn test_boot_without_closing_keeps_relay_on() {
        // ---
        let mut r = IntervalReconstructor::new(false);
        r.feed(&stream());

        // the 300 interval survives the boot and the later "on" only extends it
        assert_eq!(r.intervals().len(), 2);
        assert_eq!(r.intervals()[1].from, at(300));
        assert_eq!(r.intervals()[1].last_seen, at(560));
        assert!(r.intervals()[1].is_open());
    }

    #[test]
    fn test_off_without_on_is_ignored() {
        // ---
        let mut r = IntervalReconstructor::new(true);
        r.feed(&[rec(10, EventTag::RelayOff), rec(20, EventTag::Reading)]);

        assert!(r.intervals().is_empty());
        assert!(!r.state().relay_on);
    }

    #[test]
    fn test_replay_equivalence_for_every_split() {
        // ---
        let records = stream();
        let mut whole = IntervalReconstructor::new(true);
        whole.feed(&records);

        for cut in 0..=records.len() {
            for cut2 in cut..=records.len() {
                let mut split = IntervalReconstructor::new(true);
                split.feed(&records[..cut]);
                split.feed(&records[cut..cut2]);
                split.feed(&records[cut2..]);

                assert_eq!(split.intervals(), whole.intervals(), "split at {cut}/{cut2}");
                assert_eq!(split.state(), whole.state());
            }
        }
    }

    #[test]
    fn test_reset_clears_everything() {
        // ---
        let mut r = IntervalReconstructor::new(true);
        r.feed(&stream());
        r.reset();

        assert!(r.intervals().is_empty());
        assert!(r.boots().is_empty());
        assert_eq!(r.state(), RelayState::default());
    }
}
