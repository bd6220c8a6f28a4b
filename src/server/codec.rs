//! Incremental decoder for the wire protocol: a concatenation of JSON
//! objects with nothing but optional whitespace between them.

use crate::record::LogRecord;
use bytes::{Buf, BytesMut};

/// Buffers stream bytes and yields one [`LogRecord`] per complete JSON
/// object. Partial objects stay buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct JsonFrameDecoder {
    buf: BytesMut,
}

impl JsonFrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed freshly read stream bytes into the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode the next complete record.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete object yet.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error for malformed input. The caller
    /// closes the connection; there is no mid-stream resync.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>, serde_json::Error> {
        let (item, consumed) = {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<LogRecord>();
            let item = stream.next();
            (item, stream.byte_offset())
        };

        match item {
            None => {
                // Nothing but whitespace; drop it.
                self.buf.advance(consumed);
                Ok(None)
            }
            Some(Ok(record)) => {
                self.buf.advance(consumed);
                Ok(Some(record))
            }
            Some(Err(e)) if e.is_eof() => {
                // A partial object: keep its bytes, discard leading whitespace.
                self.buf.advance(consumed);
                Ok(None)
            }
            Some(Err(e)) => Err(e),
        }
    }

    /// True when nothing but (possibly empty) whitespace is buffered,
    /// so the stream can end here cleanly.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.buf.iter().all(u8::is_ascii_whitespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Parsed, now_unix};

    fn wire_record(name: &str) -> (LogRecord, String) {
        let record = LogRecord {
            name: name.to_string(),
            path: "/var/log/test.log".to_string(),
            host: "agent01".to_string(),
            timestamp: now_unix(),
            module: "syslog".to_string(),
            parsed: Parsed::Absent,
            raw: "hello".to_string(),
        };
        let json = serde_json::to_string(&record).unwrap();
        (record, json)
    }

    #[test]
    fn test_should_decode_objects_separated_by_whitespace() {
        let (a, a_json) = wire_record("a");
        let (b, b_json) = wire_record("b");
        let mut decoder = JsonFrameDecoder::new();
        decoder.push(format!("{a_json}\n  {b_json}\n").as_bytes());

        assert_eq!(decoder.next_record().unwrap().unwrap(), a);
        assert_eq!(decoder.next_record().unwrap().unwrap(), b);
        assert!(decoder.next_record().unwrap().is_none());
        assert!(decoder.is_drained());
    }

    #[test]
    fn test_should_hold_partial_object_until_completed() {
        let (a, a_json) = wire_record("split");
        let (head, tail) = a_json.split_at(a_json.len() / 2);

        let mut decoder = JsonFrameDecoder::new();
        decoder.push(head.as_bytes());
        assert!(decoder.next_record().unwrap().is_none());
        assert!(!decoder.is_drained());

        decoder.push(tail.as_bytes());
        assert_eq!(decoder.next_record().unwrap().unwrap(), a);
        assert!(decoder.is_drained());
    }

    #[test]
    fn test_should_error_on_malformed_input() {
        let mut decoder = JsonFrameDecoder::new();
        decoder.push(b"{\"name\": nope}");
        assert!(decoder.next_record().is_err());
    }
}
