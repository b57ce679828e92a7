//! Line framing for the modem's AT protocol.
//!
//! The modem terminates every line with `\r`. Some firmware versions emit
//! `\r\n`, so a leading `\n` is stripped from the next line; blank lines are
//! dropped.

/// Line terminator in both directions.
pub const TERMINATOR: u8 = b'\r';

/// Result of attempting to decode one line from a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A complete, non-blank line.
    Line {
        /// The line text, trimmed of surrounding whitespace.
        text: String,
        /// Total bytes consumed from the buffer (including the terminator).
        consumed: usize,
    },
    /// A terminator with nothing but whitespace before it.
    Blank(usize),
    /// No terminator in the buffer yet.
    Incomplete,
}

/// Decode the first line in `buf`.
///
/// Invalid UTF-8 is replaced rather than rejected: a garbled line still has
/// to be consumed and reported as unhandled.
pub fn decode_line(buf: &[u8]) -> DecodeResult {
    let Some(pos) = buf.iter().position(|&b| b == TERMINATOR) else {
        return DecodeResult::Incomplete;
    };

    let text = String::from_utf8_lossy(&buf[..pos]);
    let text = text.trim();
    if text.is_empty() {
        DecodeResult::Blank(pos + 1)
    } else {
        DecodeResult::Line {
            text: text.to_string(),
            consumed: pos + 1,
        }
    }
}

/// Encode a command line: the text followed by the terminator.
pub fn encode_command(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + 1);
    buf.extend_from_slice(text.as_bytes());
    buf.push(TERMINATOR);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_complete_line() {
        assert_eq!(
            decode_line(b"+OK\r"),
            DecodeResult::Line {
                text: "+OK".into(),
                consumed: 4
            }
        );
    }

    #[test]
    fn decode_incomplete() {
        assert_eq!(decode_line(b"+OK=0011"), DecodeResult::Incomplete);
        assert_eq!(decode_line(b""), DecodeResult::Incomplete);
    }

    #[test]
    fn decode_strips_line_feed() {
        // The `\n` of a preceding `\r\n` ends up at the start of the next line.
        assert_eq!(
            decode_line(b"\n+EVENT=1,1\r"),
            DecodeResult::Line {
                text: "+EVENT=1,1".into(),
                consumed: 12
            }
        );
    }

    #[test]
    fn decode_blank() {
        assert_eq!(decode_line(b"\r+OK\r"), DecodeResult::Blank(1));
        assert_eq!(decode_line(b"\n \r"), DecodeResult::Blank(3));
    }

    #[test]
    fn decode_only_first_line() {
        let buf = b"+ACK\r+EVENT=1,1\r";
        match decode_line(buf) {
            DecodeResult::Line { text, consumed } => {
                assert_eq!(text, "+ACK");
                assert_eq!(consumed, 5);
                assert_eq!(
                    decode_line(&buf[consumed..]),
                    DecodeResult::Line {
                        text: "+EVENT=1,1".into(),
                        consumed: 11
                    }
                );
            }
            other => panic!("expected Line, got {:?}", other),
        }
    }

    #[test]
    fn decode_invalid_utf8_lossy() {
        match decode_line(b"+ERR\xFF\r") {
            DecodeResult::Line { text, consumed } => {
                assert!(text.starts_with("+ERR"));
                assert_eq!(consumed, 6);
            }
            other => panic!("expected Line, got {:?}", other),
        }
    }

    #[test]
    fn encode_appends_terminator() {
        assert_eq!(encode_command("AT"), b"AT\r");
        assert_eq!(encode_command("AT+BAND=5"), b"AT+BAND=5\r");
    }
}
