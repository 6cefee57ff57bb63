//! Packed `YYMMDDHHmm` timestamps used by the controller's log files.

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};

// ---

/// Raw timestamp fields above this value are packed decimals; anything at or
/// below it is already epoch seconds (older firmware wrote plain epochs).
pub const PACKED_THRESHOLD: i64 = 2_000_000_000;

/// Decode a packed `YYMMDDHHmm` value into a UTC moment.
///
/// A value that is not a valid calendar moment decodes to the current time,
/// so one corrupt record never aborts the batch it arrived in.
pub fn decode(packed: i64) -> DateTime<Utc> {
    // ---
    let text = format!("{packed:010}");
    match NaiveDateTime::parse_from_str(&text, "%y%m%d%H%M") {
        Ok(naive) if text.len() == 10 => naive.and_utc(),
        _ => {
            tracing::debug!(packed, "invalid packed timestamp, substituting now");
            Utc::now()
        }
    }
}

/// Encode a UTC moment as a packed `YYMMDDHHmm` value (seconds are dropped).
pub fn encode(ts: DateTime<Utc>) -> i64 {
    // ---
    i64::from(ts.year().rem_euclid(100)) * 100_000_000
        + i64::from(ts.month()) * 1_000_000
        + i64::from(ts.day()) * 10_000
        + i64::from(ts.hour()) * 100
        + i64::from(ts.minute())
}

/// Interpret a raw record timestamp field, packed or epoch.
pub fn decode_field(raw: i64) -> DateTime<Utc> {
    // ---
    if raw > PACKED_THRESHOLD {
        decode(raw)
    } else {
        DateTime::from_timestamp(raw, 0).unwrap_or_else(|| {
            tracing::debug!(raw, "epoch timestamp out of range, substituting now");
            Utc::now()
        })
    }
}

/// Pick the raw field for a record timestamp.
///
/// Packed when that is lossless and cannot be mistaken for an epoch value;
/// otherwise epoch seconds, which [`decode_field`] reads back unchanged.
pub fn encode_field(ts: DateTime<Utc>) -> i64 {
    // ---
    let packed = encode(ts);
    let epoch = ts.timestamp();
    if packed > PACKED_THRESHOLD && (ts.second() == 0 || epoch > PACKED_THRESHOLD) {
        packed
    } else {
        epoch
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_packed() {
        // ---
        let ts = decode(2_403_151_245);
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 3, 15, 12, 45, 0).unwrap());
    }

    #[test]
    fn test_encode_packed() {
        // ---
        let ts = Utc.with_ymd_and_hms(2021, 1, 30, 7, 5, 59).unwrap();
        assert_eq!(encode(ts), 2_101_300_705);
    }

    #[test]
    fn test_round_trip_is_minute_exact() {
        // ---
        for ts in [
            Utc.with_ymd_and_hms(2020, 11, 10, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 0).unwrap(),
            Utc.with_ymd_and_hms(2031, 12, 31, 12, 30, 0).unwrap(),
        ] {
            assert_eq!(decode(encode(ts)), ts);
        }
    }

    #[test]
    fn test_invalid_packed_falls_back_to_now() {
        // ---
        let before = Utc::now();
        // month 13
        let ts = decode(2_413_011_200);
        assert!(ts >= before);

        let ts = decode(-5);
        assert!(ts >= before);
    }

    #[test]
    fn test_encode_field_keeps_seconds() {
        // ---
        let whole_minute = Utc.with_ymd_and_hms(2024, 3, 15, 12, 45, 0).unwrap();
        assert_eq!(encode_field(whole_minute), 2_403_151_245);

        let with_seconds = Utc.with_ymd_and_hms(2023, 11, 14, 22, 13, 50).unwrap();
        assert_eq!(encode_field(with_seconds), 1_700_000_030);
        assert_eq!(decode_field(encode_field(with_seconds)), with_seconds);

        // packed years before 2020 would read back as epoch seconds
        let old = Utc.with_ymd_and_hms(2019, 6, 1, 8, 0, 0).unwrap();
        assert_eq!(decode_field(encode_field(old)), old);
    }

    #[test]
    fn test_field_heuristic() {
        // ---
        let epoch = 1_700_000_000;
        assert_eq!(decode_field(epoch).timestamp(), epoch);

        let packed = 2_311_141_022;
        assert_eq!(
            decode_field(packed),
            Utc.with_ymd_and_hms(2023, 11, 14, 10, 22, 0).unwrap()
        );
    }
}
