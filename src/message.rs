//! Message codec (C1)
//!
//! A `Message` is the unit of delivery inside the queue engine. This
//! module is only concerned with turning one in-memory `Message` into
//! exactly one framed line on disk and back -- it knows nothing of
//! segments, channels or retries.
//!
//! Frame format, one record per line:
//!
//! ```text
//! <id>|<start_at>|<expire_at>|<created_at>|<attempts>|<max_attempts>|<data>\n
//! ```
//!
//! All numeric fields are base-10 ASCII integers separated by `|`
//! (0x7C); the record is terminated by a single `\n` (0x0A). `data` is
//! raw bytes and is never itself pipe- or newline-escaped: callers are
//! expected to hand in payloads (typically JSON) that don't contain a
//! literal newline. `trace_id` is deliberately not part of the wire
//! frame -- it's a per-delivery correlation tag the pipeline stamps on
//! a `Message` just before invoking the handler, not a durable field.

use crate::error::Error;

const SEP: u8 = b'|';
const NUM_HEADER_FIELDS: usize = 6;

/// One queued record, durable or in-flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Identity within a channel, monotonic per process, for tracing.
    pub id: i64,
    /// Unix seconds, assigned at `put`.
    pub created_at: i64,
    /// Unix seconds; 0 means immediately eligible.
    pub start_at: i64,
    /// Unix seconds; 0 means never expires.
    pub expire_at: i64,
    /// Incremented on each delivery attempt.
    pub attempts: u64,
    /// 0 means unbounded.
    pub max_attempts: u64,
    /// Correlation tag. Never persisted; set by the delivery pipeline
    /// immediately before a handler runs.
    pub trace_id: Option<String>,
    /// Opaque application payload. Never inspected by the queue engine
    /// except to reject it for being too large or containing a literal
    /// newline when strict mode is requested.
    pub data: Vec<u8>,
}

impl Message {
    /// Encode this record to its on-disk frame, including the
    /// terminating newline.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + 48);
        write_int(&mut buf, self.id);
        buf.push(SEP);
        write_int(&mut buf, self.start_at);
        buf.push(SEP);
        write_int(&mut buf, self.expire_at);
        buf.push(SEP);
        write_int(&mut buf, self.created_at);
        buf.push(SEP);
        write_int(&mut buf, self.attempts as i64);
        buf.push(SEP);
        write_int(&mut buf, self.max_attempts as i64);
        buf.push(SEP);
        buf.extend_from_slice(&self.data);
        buf.push(b'\n');
        buf
    }

    /// Decode a single frame, `line` including its terminating `\n`.
    ///
    /// In lenient mode (the default, and the only mode the on-disk
    /// reader uses) decoding stops at the first `\n` it finds, which is
    /// assumed to be the frame terminator. In strict mode, a `\n`
    /// appearing inside what would be the `data` section is rejected as
    /// malformed rather than silently treated as the terminator.
    pub fn decode(line: &[u8], strict: bool) -> Result<Message, Error> {
        let mut body = match line.last() {
            Some(b'\n') => &line[..line.len() - 1],
            _ => {
                return Err(Error::MalformedFrame(
                    "record not terminated by newline".to_string(),
                ))
            }
        };

        if let Some(pos) = body.iter().position(|&b| b == b'\n') {
            if strict {
                return Err(Error::MalformedFrame(format!(
                    "embedded newline at byte {pos} in strict mode"
                )));
            }
            body = &body[..pos];
        }

        let mut fields: [i64; NUM_HEADER_FIELDS] = [0; NUM_HEADER_FIELDS];
        let mut rest = body;
        for field in fields.iter_mut() {
            let sep_pos = rest.iter().position(|&b| b == SEP).ok_or_else(|| {
                Error::MalformedFrame("missing '|' separator in header".to_string())
            })?;
            let (head, tail) = rest.split_at(sep_pos);
            *field = parse_int(head)?;
            rest = &tail[1..];
        }

        Ok(Message {
            id: fields[0],
            start_at: fields[1],
            expire_at: fields[2],
            created_at: fields[3],
            attempts: non_negative(fields[4])?,
            max_attempts: non_negative(fields[5])?,
            trace_id: None,
            data: rest.to_vec(),
        })
    }
}

fn write_int(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(v.to_string().as_bytes());
}

fn parse_int(field: &[u8]) -> Result<i64, Error> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            Error::MalformedFrame(format!(
                "unparsable integer field: {:?}",
                String::from_utf8_lossy(field)
            ))
        })
}

fn non_negative(v: i64) -> Result<u64, Error> {
    u64::try_from(v).map_err(|_| Error::MalformedFrame(format!("negative count field: {v}")))
}
