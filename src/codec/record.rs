//! Raw log line <-> [`Record`] conversion.
//!
//! Wire shape: `[timestamp, reading…, tag?]`. The trailing tag string is
//! omitted for plain readings, so reading lines are one field shorter than
//! event lines. Keep it that way; the controller firmware and persisted
//! caches depend on it.

use serde_json::Value;

use crate::codec::time;
use crate::error::RecordFormatError;
use crate::models::{EventTag, RawField, Record};

// ---

/// Parse one raw record.
pub fn parse(fields: &[RawField]) -> Result<Record, RecordFormatError> {
    // ---
    let (first, rest) = fields.split_first().ok_or(RecordFormatError::Empty)?;

    let timestamp = match first {
        RawField::Number(raw) => time::decode_field(*raw),
        RawField::Text(text) => return Err(RecordFormatError::BadTimestamp(text.clone())),
    };

    let (event, values) = match rest.split_last() {
        Some((RawField::Text(tag), values)) => (EventTag::from_wire(tag)?, values),
        _ => (EventTag::Reading, rest),
    };

    let readings = values
        .iter()
        .enumerate()
        .map(|(index, field)| match field {
            RawField::Number(n) => i32::try_from(*n).map_err(|_| RecordFormatError::BadReading {
                index,
                value: n.to_string(),
            }),
            RawField::Text(text) => Err(RecordFormatError::BadReading {
                index,
                value: text.clone(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Record {
        timestamp,
        readings,
        event,
    })
}

/// Parse one raw record straight from a JSON value.
pub fn parse_value(value: &Value) -> Result<Record, RecordFormatError> {
    // ---
    let items = value.as_array().ok_or(RecordFormatError::NotAnArray)?;

    let fields = items
        .iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::String(s) => Ok(RawField::Text(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .map(RawField::Number)
                .ok_or_else(|| field_error(index, item)),
            other => Err(field_error(index, other)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    parse(&fields)
}

/// Parse a batch of raw records, skipping malformed ones.
///
/// Returns the parsed records plus one `(line index, error)` per skipped line.
pub fn parse_lines(lines: &[Value]) -> (Vec<Record>, Vec<(usize, RecordFormatError)>) {
    // ---
    let mut records = Vec::with_capacity(lines.len());
    let mut rejected = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        match parse_value(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!("Skipping malformed record #{}: {} - Raw line: {}", i, e, line);
                rejected.push((i, e));
            }
        }
    }

    (records, rejected)
}

/// Serialize a record into its raw wire form.
pub fn serialize(record: &Record) -> Vec<RawField> {
    // ---
    let mut fields = Vec::with_capacity(record.readings.len() + 2);
    fields.push(RawField::Number(time::encode_field(record.timestamp)));
    fields.extend(record.readings.iter().map(|r| RawField::Number(i64::from(*r))));

    if let Some(tag) = record.event.wire_tag() {
        fields.push(RawField::Text(tag.to_string()));
    }
    fields
}

fn field_error(index: usize, value: &Value) -> RecordFormatError {
    // ---
    if index == 0 {
        RecordFormatError::BadTimestamp(value.to_string())
    } else {
        RecordFormatError::BadReading {
            index: index - 1,
            value: value.to_string(),
        }
    }
}
