//! RESP2 wire format: five marker bytes (`+` `-` `:` `$` `*`), CRLF
//! line endings, length-prefixed binary-safe payloads.
//!
//! Decoding never consumes partial input. A frame is first decoded
//! against the buffer by offset; only once it is complete is the buffer
//! advanced past it, so a short read simply retries from the same
//! position when more bytes arrive.

use bytes::{Buf, BytesMut};

/// Largest accepted bulk payload (512 MiB).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest accepted element count in one array frame.
const MAX_ARRAY_LEN: i64 = 1024 * 1024;
/// Cutoff for an inline line that never produced a CRLF.
const MAX_INLINE_LEN: usize = 64 * 1024;

/// A RESP2 value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// `+OK\r\n`
    SimpleString(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n`, or `$-1\r\n` for the null form
    BulkString(Option<Vec<u8>>),
    /// `*2\r\n...`, or `*-1\r\n` for the null form
    Array(Option<Vec<RespValue>>),
    /// Pre-serialized frames emitted verbatim. Used for multi-frame
    /// replies (subscription notification bursts); never produced by
    /// the parser.
    Raw(Vec<u8>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk_string() -> Self {
        RespValue::BulkString(None)
    }

    pub fn null_array() -> Self {
        RespValue::Array(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// Canonical byte form of this value.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_to(&mut out);
        out
    }

    /// Append the canonical byte form to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => put_text_line(out, b'+', s),
            RespValue::Error(s) => put_text_line(out, b'-', s),
            RespValue::Integer(n) => put_header(out, b':', *n),
            RespValue::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(payload)) => {
                put_header(out, b'$', payload.len() as i64);
                out.extend_from_slice(payload);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                put_header(out, b'*', items.len() as i64);
                for item in items {
                    item.write_to(out);
                }
            }
            RespValue::Raw(frames) => out.extend_from_slice(frames),
        }
    }

    /// The value's bytes when it can act as a command word or argument.
    pub fn as_str(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(Some(data)) => Some(data),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Lossy UTF-8 view of `as_str`.
    pub fn to_string_lossy(&self) -> Option<String> {
        self.as_str()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

fn put_header(out: &mut Vec<u8>, marker: u8, n: i64) {
    out.push(marker);
    out.extend_from_slice(n.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// CR and LF cannot appear inside a line-delimited payload; they are
/// replaced with spaces so the frame stays parseable.
fn put_text_line(out: &mut Vec<u8>, marker: u8, text: &str) {
    out.push(marker);
    out.extend(
        text.bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    out.extend_from_slice(b"\r\n");
}

/// Streaming parser over an append-only receive buffer.
pub struct RespParser;

impl RespParser {
    /// Extract the next complete frame, if the buffer holds one.
    ///
    /// `Ok(Some(..))` consumes the frame's bytes. `Ok(None)` leaves the
    /// buffer untouched so the caller can retry after the next read.
    /// Input whose first byte is not a marker is handled as a
    /// whitespace-delimited inline command ending at CRLF.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
        let Some(&marker) = buf.first() else {
            return Ok(None);
        };
        if !matches!(marker, b'+' | b'-' | b':' | b'$' | b'*') {
            return parse_inline(buf);
        }
        match decode_frame(buf, 0)? {
            Some((value, end)) => {
                buf.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Decode one frame starting at `pos`. Returns the value and the offset
/// just past it, or `None` while the frame is still incomplete. The
/// buffer itself is never modified here.
fn decode_frame(buf: &[u8], pos: usize) -> Result<Option<(RespValue, usize)>, RespError> {
    let Some(&marker) = buf.get(pos) else {
        return Ok(None);
    };
    let Some((line, body)) = take_line(buf, pos + 1) else {
        return Ok(None);
    };

    match marker {
        b'+' => Ok(Some((RespValue::SimpleString(lossy(line)), body))),
        b'-' => Ok(Some((RespValue::Error(lossy(line)), body))),
        b':' => Ok(Some((RespValue::Integer(decode_i64(line)?), body))),
        b'$' => {
            let len = decode_i64(line)?;
            if len == -1 {
                return Ok(Some((RespValue::BulkString(None), body)));
            }
            if len < 0 || len > MAX_BULK_LEN {
                return Err(RespError::Malformed("bulk length out of range"));
            }
            let len = len as usize;
            let end = body + len + 2;
            if buf.len() < end {
                return Ok(None);
            }
            if &buf[end - 2..end] != b"\r\n" {
                return Err(RespError::Malformed("bulk payload not CRLF-terminated"));
            }
            let payload = buf[body..body + len].to_vec();
            Ok(Some((RespValue::BulkString(Some(payload)), end)))
        }
        b'*' => {
            let count = decode_i64(line)?;
            if count < 0 {
                // -1 is the null array; other negative counts collapse
                // to it as well.
                return Ok(Some((RespValue::Array(None), body)));
            }
            if count > MAX_ARRAY_LEN {
                return Err(RespError::Malformed("array length out of range"));
            }
            let mut items = Vec::with_capacity(count.min(64) as usize);
            let mut cursor = body;
            for _ in 0..count {
                match decode_frame(buf, cursor)? {
                    Some((item, next)) => {
                        items.push(item);
                        cursor = next;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(Some(items)), cursor)))
        }
        other => Err(RespError::BadMarker(other)),
    }
}

/// The bytes between `start` and the next CRLF, plus the offset just
/// past the CRLF.
fn take_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rel = buf.get(start..)?.windows(2).position(|w| w == b"\r\n")?;
    Some((&buf[start..start + rel], start + rel + 2))
}

fn decode_i64(line: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(RespError::Malformed("expected a decimal integer"))
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

/// Legacy inline form: one whitespace-delimited command per CRLF line,
/// presented to the dispatcher as an array of bulk strings. A blank
/// line becomes an empty array the caller can skip.
fn parse_inline(buf: &mut BytesMut) -> Result<Option<RespValue>, RespError> {
    let (tokens, end) = match take_line(buf, 0) {
        Some((line, end)) => (tokenize_inline(line)?, end),
        None => {
            if buf.len() > MAX_INLINE_LEN {
                return Err(RespError::Malformed("inline command too long"));
            }
            return Ok(None);
        }
    };
    buf.advance(end);

    let items = tokens
        .into_iter()
        .map(|token| RespValue::BulkString(Some(token)))
        .collect();
    Ok(Some(RespValue::Array(Some(items))))
}

/// Split an inline line into tokens. Double quotes group whitespace and
/// understand `\n` `\r` `\t` `\\` `\"` escapes; single quotes group
/// verbatim. Quoted segments glue onto the surrounding token.
fn tokenize_inline(line: &[u8]) -> Result<Vec<Vec<u8>>, RespError> {
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < line.len() {
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= line.len() {
            break;
        }

        let mut token = Vec::new();
        while i < line.len() && !line[i].is_ascii_whitespace() {
            match line[i] {
                b'"' => {
                    i += 1;
                    loop {
                        match line.get(i) {
                            None => {
                                return Err(RespError::Malformed(
                                    "unbalanced quote in inline command",
                                ))
                            }
                            Some(b'"') => {
                                i += 1;
                                break;
                            }
                            Some(b'\\') if i + 1 < line.len() => {
                                token.push(match line[i + 1] {
                                    b'n' => b'\n',
                                    b'r' => b'\r',
                                    b't' => b'\t',
                                    other => other,
                                });
                                i += 2;
                            }
                            Some(&other) => {
                                token.push(other);
                                i += 1;
                            }
                        }
                    }
                }
                b'\'' => {
                    i += 1;
                    loop {
                        match line.get(i) {
                            None => {
                                return Err(RespError::Malformed(
                                    "unbalanced quote in inline command",
                                ))
                            }
                            Some(b'\'') => {
                                i += 1;
                                break;
                            }
                            Some(&other) => {
                                token.push(other);
                                i += 1;
                            }
                        }
                    }
                }
                other => {
                    token.push(other);
                    i += 1;
                }
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}

#[derive(Debug, thiserror::Error)]
pub enum RespError {
    #[error("invalid marker byte 0x{0:02x}")]
    BadMarker(u8),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &[u8]) -> RespValue {
        let mut buf = BytesMut::from(input);
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "frame left {} unconsumed bytes", buf.len());
        value
    }

    fn command(words: &[&str]) -> RespValue {
        RespValue::Array(Some(
            words
                .iter()
                .map(|w| RespValue::BulkString(Some(w.as_bytes().to_vec())))
                .collect(),
        ))
    }

    #[test]
    fn drip_fed_frame_completes_only_at_the_last_byte() {
        let wire = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n";
        let mut buf = BytesMut::new();
        for &byte in &wire[..wire.len() - 1] {
            buf.extend_from_slice(&[byte]);
            let result = RespParser::parse(&mut buf).unwrap();
            assert!(result.is_none(), "frame completed early at {} bytes", buf.len());
        }
        // No partial progress was consumed along the way
        assert_eq!(&buf[..], &wire[..wire.len() - 1]);

        buf.extend_from_slice(&wire[wire.len() - 1..]);
        let value = RespParser::parse(&mut buf).unwrap().unwrap();
        assert_eq!(value, command(&["GET", "foo"]));
        assert!(buf.is_empty());
    }

    #[test]
    fn pipelined_frames_parse_in_order() {
        let mut buf = BytesMut::from(
            &b"*1\r\n$4\r\nPING\r\n*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n+OK\r\n"[..],
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap().unwrap(),
            command(&["PING"])
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap().unwrap(),
            command(&["SET", "k", "v"])
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap().unwrap(),
            RespValue::SimpleString("OK".into())
        );
        assert!(RespParser::parse(&mut buf).unwrap().is_none());
    }

    #[test]
    fn bulk_payload_is_binary_safe() {
        let value = parse_one(b"$8\r\na\x00b\r\nc\xffd\r\n");
        assert_eq!(
            value,
            RespValue::BulkString(Some(b"a\x00b\r\nc\xffd".to_vec()))
        );
    }

    #[test]
    fn null_and_empty_forms_are_distinct() {
        assert_eq!(parse_one(b"$-1\r\n"), RespValue::BulkString(None));
        assert_eq!(parse_one(b"$0\r\n\r\n"), RespValue::BulkString(Some(vec![])));
        assert_eq!(parse_one(b"*-1\r\n"), RespValue::Array(None));
        assert_eq!(parse_one(b"*0\r\n"), RespValue::Array(Some(vec![])));
    }

    #[test]
    fn signed_integers_decode() {
        assert_eq!(parse_one(b":0\r\n"), RespValue::Integer(0));
        assert_eq!(parse_one(b":-8192\r\n"), RespValue::Integer(-8192));
    }

    #[test]
    fn errors_decode_with_their_prefix() {
        assert_eq!(
            parse_one(b"-WRONGTYPE bad operand\r\n"),
            RespValue::Error("WRONGTYPE bad operand".into())
        );
    }

    #[test]
    fn bad_length_headers_are_rejected() {
        let mut buf = BytesMut::from(&b"$abc\r\n"[..]);
        assert!(RespParser::parse(&mut buf).is_err());

        let mut buf = BytesMut::from(&b"$-2\r\n"[..]);
        assert!(RespParser::parse(&mut buf).is_err());

        let mut buf = BytesMut::from(&b"*notanum\r\n"[..]);
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn missing_bulk_terminator_is_rejected() {
        // Four payload bytes where the length promises three
        let mut buf = BytesMut::from(&b"$3\r\nabcd\r\n"[..]);
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn bad_marker_inside_array_is_rejected() {
        let mut buf = BytesMut::from(&b"*2\r\n$1\r\nx\r\n^oops\r\n"[..]);
        assert!(matches!(
            RespParser::parse(&mut buf),
            Err(RespError::BadMarker(b'^'))
        ));
    }

    #[test]
    fn inline_command_splits_on_whitespace() {
        assert_eq!(
            parse_one(b"SET  counter   10\r\n"),
            command(&["SET", "counter", "10"])
        );
    }

    #[test]
    fn inline_quotes_group_and_escape() {
        assert_eq!(
            parse_one(b"SET greeting \"hello world\"\r\n"),
            command(&["SET", "greeting", "hello world"])
        );
        assert_eq!(
            parse_one(b"ECHO \"a\\tb\"\r\n"),
            command(&["ECHO", "a\tb"])
        );
        // Single quotes take their contents verbatim and glue onto the
        // surrounding token
        assert_eq!(
            parse_one(b"ECHO pre'mid dle'post\r\n"),
            command(&["ECHO", "premid dlepost"])
        );
    }

    #[test]
    fn unbalanced_inline_quote_is_rejected() {
        let mut buf = BytesMut::from(&b"SET k \"oops\r\n"[..]);
        assert!(RespParser::parse(&mut buf).is_err());
    }

    #[test]
    fn blank_inline_line_is_an_empty_command() {
        let mut buf = BytesMut::from(&b"\r\nPING\r\n"[..]);
        assert_eq!(
            RespParser::parse(&mut buf).unwrap().unwrap(),
            RespValue::Array(Some(vec![]))
        );
        assert_eq!(
            RespParser::parse(&mut buf).unwrap().unwrap(),
            command(&["PING"])
        );
    }

    #[test]
    fn encoder_output_reparses_identically() {
        let original = RespValue::Array(Some(vec![
            RespValue::Integer(-3),
            RespValue::BulkString(Some(b"bin\x00\xfe".to_vec())),
            RespValue::Array(Some(vec![
                RespValue::SimpleString("nested".into()),
                RespValue::BulkString(None),
            ])),
            RespValue::Array(None),
        ]));
        assert_eq!(parse_one(&original.serialize()), original);
    }

    #[test]
    fn simple_strings_and_errors_scrub_line_breaks() {
        let reply = RespValue::simple_string("split\r\nreply");
        assert_eq!(reply.serialize(), b"+split  reply\r\n");
        let reply = RespValue::error("ERR line\nbreak");
        assert_eq!(reply.serialize(), b"-ERR line break\r\n");
    }

    #[test]
    fn raw_frames_pass_through_unframed() {
        let first = RespValue::integer(1).serialize();
        let second = RespValue::ok().serialize();
        let burst = RespValue::Raw([first.clone(), second.clone()].concat());
        assert_eq!(burst.serialize(), [first, second].concat());
    }

    #[test]
    fn as_str_covers_command_words() {
        assert_eq!(
            RespValue::bulk_string(b"GET".to_vec()).as_str(),
            Some(&b"GET"[..])
        );
        assert_eq!(
            RespValue::SimpleString("PING".into()).as_str(),
            Some(&b"PING"[..])
        );
        assert_eq!(RespValue::Integer(1).as_str(), None);
        assert_eq!(RespValue::null_bulk_string().as_str(), None);
    }
}
