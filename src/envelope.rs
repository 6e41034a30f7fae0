//! Newline-delimited JSON envelope codec.
//!
//! Wire contract: every record is a single JSON object followed by `\n`.
//! Log records carry `timestamp`, `hostname`, `program`, `pid` (a JSON
//! integer) and `message`. Heartbeats carry `"beat": true` and a timestamp
//! only; a receiver treats any object with `beat` set as keep-alive and
//! discards it.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::EnvelopeError,
    log_record::{HeartbeatRecord, ShipRecord},
};

/// Record delimiter appended after every object.
pub const RECORD_DELIMITER: u8 = b'\n';

#[derive(Serialize)]
struct LogEnvelope<'a> {
    timestamp: String,
    hostname: &'a str,
    program: &'a str,
    pid: u32,
    message: &'a str,
}

impl<'a> From<&'a ShipRecord> for LogEnvelope<'a> {
    fn from(record: &'a ShipRecord) -> Self {
        Self {
            timestamp: format_timestamp(&record.timestamp),
            hostname: &record.hostname,
            program: &record.program,
            pid: record.pid,
            message: &record.message,
        }
    }
}

#[derive(Serialize)]
struct BeatEnvelope {
    beat: bool,
    timestamp: String,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    #[serde(default)]
    beat: bool,
    timestamp: Option<String>,
    hostname: Option<String>,
    program: Option<String>,
    pid: Option<u32>,
    message: Option<String>,
}

/// Format a capture time as RFC 3339 with microsecond precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Serialise a log record into one delimited JSON object.
pub fn encode(record: &ShipRecord) -> Result<Vec<u8>, EnvelopeError> {
    let mut buf = Vec::with_capacity(96 + record.message.len());
    serde_json::to_writer(&mut buf, &LogEnvelope::from(record)).map_err(EnvelopeError::Encode)?;
    buf.push(RECORD_DELIMITER);
    Ok(buf)
}

/// Serialise a heartbeat marker.
pub fn encode_heartbeat(beat: &HeartbeatRecord) -> Result<Vec<u8>, EnvelopeError> {
    let envelope = BeatEnvelope {
        beat: true,
        timestamp: format_timestamp(&beat.timestamp),
    };
    let mut buf = serde_json::to_vec(&envelope).map_err(EnvelopeError::Encode)?;
    buf.push(RECORD_DELIMITER);
    Ok(buf)
}

/// A record as seen by a conforming receiver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireRecord {
    /// Keep-alive marker; carries no content.
    Heartbeat { timestamp: Option<String> },
    /// One shipped log line.
    Log(DecodedLog),
}

/// Content fields of a decoded log record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedLog {
    pub timestamp: String,
    pub hostname: String,
    pub program: String,
    pub pid: u32,
    pub message: String,
}

/// Decode one record. A trailing delimiter is tolerated.
pub fn decode(line: &[u8]) -> Result<WireRecord, EnvelopeError> {
    let line = line.strip_suffix(&[RECORD_DELIMITER]).unwrap_or(line);
    let incoming: IncomingEnvelope = serde_json::from_slice(line).map_err(EnvelopeError::Decode)?;
    if incoming.beat {
        return Ok(WireRecord::Heartbeat {
            timestamp: incoming.timestamp,
        });
    }
    Ok(WireRecord::Log(DecodedLog {
        timestamp: incoming
            .timestamp
            .ok_or(EnvelopeError::MissingField("timestamp"))?,
        hostname: incoming
            .hostname
            .ok_or(EnvelopeError::MissingField("hostname"))?,
        program: incoming
            .program
            .ok_or(EnvelopeError::MissingField("program"))?,
        pid: incoming.pid.ok_or(EnvelopeError::MissingField("pid"))?,
        message: incoming
            .message
            .ok_or(EnvelopeError::MissingField("message"))?,
    }))
}

/// Split a received byte stream into records, decoding each complete line.
///
/// Bytes after the final delimiter are an incomplete record and ignored.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<WireRecord>, EnvelopeError> {
    let Some(end) = bytes.iter().rposition(|b| *b == RECORD_DELIMITER) else {
        return Ok(Vec::new());
    };
    bytes[..end]
        .split(|b| *b == RECORD_DELIMITER)
        .filter(|line| !line.is_empty())
        .map(decode)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::log_record::ShipperIdentity;

    fn identity() -> ShipperIdentity {
        ShipperIdentity::new("web-1", "nginx", 4242)
    }

    #[rstest]
    fn encodes_exact_field_set() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let record = ShipRecord::at(ts, &identity(), "hello");
        let bytes = encode(&record).expect("encode");
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "{\"timestamp\":\"2024-05-01T12:30:00.000000Z\",\"hostname\":\"web-1\",\
             \"program\":\"nginx\",\"pid\":4242,\"message\":\"hello\"}\n"
        );
    }

    #[rstest]
    fn heartbeat_omits_content_fields() {
        let beat = HeartbeatRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        };
        let bytes = encode_heartbeat(&beat).expect("encode heartbeat");
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "{\"beat\":true,\"timestamp\":\"2024-05-01T00:00:00.000000Z\"}\n"
        );
    }

    #[rstest]
    fn heartbeat_is_never_decoded_as_log() {
        let bytes = encode_heartbeat(&HeartbeatRecord::now()).expect("encode heartbeat");
        assert!(matches!(
            decode(&bytes).expect("decode"),
            WireRecord::Heartbeat { .. }
        ));
    }

    #[rstest]
    #[case::no_message(r#"{"timestamp":"t","hostname":"h","program":"p","pid":1}"#, "message")]
    #[case::no_pid(r#"{"timestamp":"t","hostname":"h","program":"p","message":"m"}"#, "pid")]
    fn rejects_incomplete_log_records(#[case] json: &str, #[case] field: &str) {
        let err = decode(json.as_bytes()).expect_err("incomplete record");
        assert!(matches!(err, EnvelopeError::MissingField(f) if f == field));
    }

    #[rstest]
    fn message_delimiters_are_escaped() {
        let record = ShipRecord::capture(&identity(), "line\nwith\nbreaks");
        let bytes = encode(&record).expect("encode");
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 1);
    }

    #[rstest]
    fn decode_stream_ignores_incomplete_tail() {
        let mut bytes = encode(&ShipRecord::capture(&identity(), "one")).unwrap();
        bytes.extend(encode_heartbeat(&HeartbeatRecord::now()).unwrap());
        bytes.extend_from_slice(b"{\"timestamp\":");
        let records = decode_stream(&bytes).expect("decode stream");
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], WireRecord::Log(log) if log.message == "one"));
        assert!(matches!(records[1], WireRecord::Heartbeat { .. }));
    }

    proptest! {
        #[test]
        fn decode_preserves_content(message in any::<String>(), pid in any::<u32>()) {
            let identity = ShipperIdentity::new("host", "prog", pid);
            let record = ShipRecord::capture(&identity, message.clone());
            let decoded = decode(&encode(&record).unwrap()).unwrap();
            let WireRecord::Log(log) = decoded else {
                panic!("log record decoded as heartbeat");
            };
            prop_assert_eq!(log.message, message);
            prop_assert_eq!(log.hostname, "host");
            prop_assert_eq!(log.program, "prog");
            prop_assert_eq!(log.pid, pid);
            prop_assert!(DateTime::parse_from_rfc3339(&log.timestamp).is_ok());
        }
    }
}
