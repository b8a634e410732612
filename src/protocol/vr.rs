use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::{debug, trace, warn};

/// Record separator of the virtual remote protocol
pub const SEPARATOR: &[u8] = b"\n\0";

/// Default TCP port of a virtual remote listener
pub const DEFAULT_PORT: u16 = 2033;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VrAction {
    Down,
    Up,
}

/// One `<action>\t<key>` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrRecord {
    pub action: VrAction,
    pub key: String,
}

impl VrRecord {
    /// Parse the text of a record (separator already stripped)
    pub fn parse(record: &str) -> Option<Self> {
        let (action, key) = record.split_once('\t')?;
        let action = match action {
            "D" => VrAction::Down,
            "U" => VrAction::Up,
            _ => return None,
        };
        Some(Self {
            action,
            key: key.to_string(),
        })
    }
}

/// Bytes sent for one key press: key down, then key up, in a single write
pub fn encode_press(key: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * (key.len() + 4));
    for action in ["D", "U"] {
        out.extend_from_slice(action.as_bytes());
        out.push(b'\t');
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(SEPARATOR);
    }
    out
}

/// Reduce a record to a key press.
///
/// Only the key-up completes a press. Whether the key-down before it named
/// the same key is not checked.
pub fn decode_key(record: VrRecord) -> Option<String> {
    match record.action {
        VrAction::Up => Some(record.key),
        VrAction::Down => {
            trace!("Key down: {}", record.key);
            None
        }
    }
}

/// Longest record a listener buffers before giving up on it
pub const VR_MAX_RECORD: usize = 4096;

/// Splits a byte stream into virtual remote records.
///
/// Partial records stay buffered until the rest arrives, so a record split
/// across TCP segments comes out whole and in order. A record longer than
/// the maximum length is dropped, and so is everything up to the next
/// separator.
#[derive(Debug)]
pub struct VrCodec {
    // Where to resume scanning for the separator
    next_index: usize,
    max_length: usize,
    // Inside an overlong record whose separator has not arrived yet
    discarding: bool,
}

impl Default for VrCodec {
    fn default() -> Self {
        Self::with_max_length(VR_MAX_RECORD)
    }
}

impl VrCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
            discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Decoder for VrCodec {
    type Item = VrRecord;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<VrRecord>, Self::Error> {
        loop {
            // Resume one byte early in case the last read ended between \n and \0
            let start = self.next_index.saturating_sub(SEPARATOR.len() - 1);
            let found = src[start..]
                .windows(SEPARATOR.len())
                .position(|w| w == SEPARATOR)
                .map(|offset| start + offset);

            let Some(end) = found else {
                if self.discarding || src.len() > self.max_length {
                    if !self.discarding {
                        warn!(
                            "Virtual remote record exceeds {} bytes; discarding it",
                            self.max_length
                        );
                        self.discarding = true;
                    }
                    // Keep a trailing \n, it may be the first half of a separator
                    let keep = usize::from(src.last() == Some(&SEPARATOR[0]));
                    src.advance(src.len() - keep);
                }
                self.next_index = src.len();
                return Ok(None);
            };

            self.next_index = 0;
            let record = src.split_to(end);
            src.advance(SEPARATOR.len());

            if self.discarding {
                trace!("Dropped the tail of an overlong record ({} bytes)", record.len());
                self.discarding = false;
                continue;
            }
            if record.len() > self.max_length {
                warn!(
                    "Ignoring virtual remote record of {} bytes (limit {})",
                    record.len(),
                    self.max_length
                );
                continue;
            }

            let text = String::from_utf8_lossy(&record);
            match VrRecord::parse(&text) {
                Some(record) => return Ok(Some(record)),
                None => warn!("Ignoring malformed virtual remote record: {:?}", text),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<VrRecord>, Self::Error> {
        match self.decode(src)? {
            Some(record) => Ok(Some(record)),
            None => {
                if !src.is_empty() {
                    debug!("Discarding {} bytes of unterminated record at end of stream", src.len());
                    src.clear();
                }
                self.next_index = 0;
                self.discarding = false;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut VrCodec, buf: &mut BytesMut) -> Vec<VrRecord> {
        let mut out = Vec::new();
        while let Some(record) = codec.decode(buf).unwrap() {
            out.push(record);
        }
        out
    }

    #[test]
    fn test_encode_press() {
        assert_eq!(encode_press("MENU"), b"D\tMENU\n\0U\tMENU\n\0".to_vec());
    }

    #[test]
    fn test_split_records() {
        let mut codec = VrCodec::new();
        let mut buf = BytesMut::from(&b"D\thello\n\0U\tThis\n\0D\tis\n\0"[..]);

        let records = decode_all(&mut codec, &mut buf);
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["hello", "This", "is"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_fragmented_input() {
        let mut codec = VrCodec::new();
        let mut buf = BytesMut::new();
        let mut records = Vec::new();

        // Deliver one byte at a time, including a split inside the separator
        for byte in encode_press("OK").iter().chain(encode_press("UP").iter()) {
            buf.extend_from_slice(&[*byte]);
            records.extend(decode_all(&mut codec, &mut buf));
        }

        assert_eq!(
            records,
            vec![
                VrRecord { action: VrAction::Down, key: "OK".into() },
                VrRecord { action: VrAction::Up, key: "OK".into() },
                VrRecord { action: VrAction::Down, key: "UP".into() },
                VrRecord { action: VrAction::Up, key: "UP".into() },
            ]
        );
    }

    #[test]
    fn test_only_key_up_is_reported() {
        let records = ["D\tCHEESE", "D\tHELLO", "U\tHELLO", "U\tCHEESE"];
        let keys: Vec<_> = records
            .iter()
            .filter_map(|r| VrRecord::parse(r))
            .filter_map(decode_key)
            .collect();
        assert_eq!(keys, ["HELLO", "CHEESE"]);
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let mut codec = VrCodec::new();
        let mut buf = BytesMut::from(&b"garbage\n\0X\tKEY\n\0U\tOK\n\0"[..]);

        let records = decode_all(&mut codec, &mut buf);
        assert_eq!(records, vec![VrRecord { action: VrAction::Up, key: "OK".into() }]);
    }

    #[test]
    fn test_trailing_partial_record_is_discarded_at_eof() {
        let mut codec = VrCodec::new();
        let mut buf = BytesMut::from(&b"U\tOK\n\0U\tHALF"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap().key, "OK");
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overlong_record_does_not_grow_buffer() {
        let mut codec = VrCodec::with_max_length(16);
        let mut buf = BytesMut::new();

        // A peer that never sends a separator
        for _ in 0..100 {
            buf.extend_from_slice(b"XXXXXXXXXX");
            assert!(codec.decode(&mut buf).unwrap().is_none());
            assert!(buf.len() <= codec.max_length() + 10, "{} bytes buffered", buf.len());
        }

        // The rest of the overlong record is dropped, the next one comes through
        buf.extend_from_slice(b"more\n\0U\tOK\n\0");
        let records = decode_all(&mut codec, &mut buf);
        assert_eq!(records, vec![VrRecord { action: VrAction::Up, key: "OK".into() }]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_complete_overlong_record_is_skipped() {
        let mut codec = VrCodec::with_max_length(8);
        let mut buf = BytesMut::from(&b"U\tMUCH_TOO_LONG\n\0U\tOK\n\0"[..]);

        let records = decode_all(&mut codec, &mut buf);
        assert_eq!(records, vec![VrRecord { action: VrAction::Up, key: "OK".into() }]);
    }

    #[test]
    fn test_separator_split_while_discarding() {
        let mut codec = VrCodec::with_max_length(4);
        let mut buf = BytesMut::from(&b"U\tLONGKEY\n"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"\n");

        buf.extend_from_slice(b"\0U\tOK\n\0");
        let records = decode_all(&mut codec, &mut buf);
        assert_eq!(records, vec![VrRecord { action: VrAction::Up, key: "OK".into() }]);
    }
}
