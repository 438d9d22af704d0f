//! RESP2 framing.
//!
//! Requests go out as arrays of bulk strings. Replies are decoded frame by
//! frame: each complete frame is taken off the read buffer as soon as it has
//! arrived, and arrays are assembled on a stack kept between reads. A reply
//! that arrives over many reads is therefore scanned once.

use super::{Command, RedisError, RedisValue};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Maximum nesting depth for arrays.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Maximum bulk string size (512MB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array elements.
pub const MAX_ELEMENTS: usize = 1_000_000;

/// A reply stream that cannot be decoded. The connection is out of step
/// after any of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected reply type byte 0x{0:02x}")]
    UnknownType(u8),

    #[error("invalid {0} header")]
    BadHeader(&'static str),

    #[error("{what} too large: {len} > {max}")]
    TooLarge {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("missing CRLF after bulk string")]
    MissingTerminator,

    #[error("maximum nesting depth exceeded")]
    TooDeep,
}

enum Frame {
    Value(RedisValue),
    ArrayStart(usize),
}

#[derive(Debug)]
struct PartialArray {
    remaining: usize,
    items: Vec<RedisValue>,
}

/// Incremental reply decoder for one connection.
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    open: Vec<PartialArray>,
}

impl ReplyDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next reply from `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Complete frames are
    /// consumed from `buf` even then; the next call picks up where this one
    /// stopped.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RedisValue>, DecodeError> {
        loop {
            let mut value = match next_frame(buf)? {
                None => return Ok(None),
                Some(Frame::ArrayStart(len)) => {
                    if self.open.len() >= MAX_NESTING_DEPTH {
                        return Err(DecodeError::TooDeep);
                    }
                    self.open.push(PartialArray {
                        remaining: len,
                        items: Vec::with_capacity(len.min(1024)),
                    });
                    continue;
                }
                Some(Frame::Value(value)) => value,
            };

            loop {
                let Some(parent) = self.open.last_mut() else {
                    return Ok(Some(value));
                };
                parent.items.push(value);
                parent.remaining -= 1;
                if parent.remaining > 0 {
                    break;
                }
                let items = self.open.pop().map(|done| done.items).unwrap_or_default();
                value = RedisValue::Array(items);
            }
        }
    }

    /// Check if part of an array reply has been consumed already.
    pub fn is_mid_reply(&self) -> bool {
        !self.open.is_empty()
    }
}

fn next_frame(buf: &mut BytesMut) -> Result<Option<Frame>, DecodeError> {
    let Some(&prefix) = buf.first() else {
        return Ok(None);
    };
    let Some(line_len) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };
    let header = 1 + line_len + 2;
    let line = &buf[1..1 + line_len];

    let frame = match prefix {
        b'+' => Frame::Value(RedisValue::SimpleString(
            String::from_utf8_lossy(line).into_owned(),
        )),
        b'-' => Frame::Value(RedisValue::Error(RedisError::parse(
            &String::from_utf8_lossy(line),
        ))),
        b':' => Frame::Value(RedisValue::Integer(
            parse_decimal(line).ok_or(DecodeError::BadHeader("integer"))?,
        )),
        b'$' => match parse_decimal(line) {
            Some(-1) => Frame::Value(RedisValue::Null),
            Some(len) if len >= 0 => {
                let len = len as usize;
                if len > MAX_BULK_SIZE {
                    return Err(DecodeError::TooLarge {
                        what: "bulk string",
                        len,
                        max: MAX_BULK_SIZE,
                    });
                }
                let end = header + len;
                if buf.len() < end + 2 {
                    buf.reserve(end + 2 - buf.len());
                    return Ok(None);
                }
                if &buf[end..end + 2] != b"\r\n" {
                    return Err(DecodeError::MissingTerminator);
                }
                buf.advance(header);
                let data = buf.split_to(len).freeze();
                buf.advance(2);
                return Ok(Some(Frame::Value(RedisValue::BulkString(data))));
            }
            _ => return Err(DecodeError::BadHeader("bulk string")),
        },
        b'*' => match parse_decimal(line) {
            Some(-1) => Frame::Value(RedisValue::Null),
            Some(0) => Frame::Value(RedisValue::Array(Vec::new())),
            Some(len) if len > 0 => {
                let len = len as usize;
                if len > MAX_ELEMENTS {
                    return Err(DecodeError::TooLarge {
                        what: "array",
                        len,
                        max: MAX_ELEMENTS,
                    });
                }
                Frame::ArrayStart(len)
            }
            _ => return Err(DecodeError::BadHeader("array")),
        },
        other => return Err(DecodeError::UnknownType(other)),
    };
    buf.advance(header);
    Ok(Some(frame))
}

/// Append `command` as an array of bulk strings.
pub fn encode_command(command: &Command, buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice((command.args.len() + 1).to_string().as_bytes());
    buf.put_slice(b"\r\n");
    put_bulk(buf, command.name.as_bytes());
    for arg in &command.args {
        put_bulk(buf, arg);
    }
}

fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u8(b'$');
    buf.put_slice(data.len().to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn parse_decimal(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn decode_all(data: &[u8]) -> (Vec<RedisValue>, BytesMut) {
        let mut decoder = ReplyDecoder::new();
        let mut buf = BytesMut::from(data);
        let mut out = Vec::new();
        while let Some(value) = decoder.decode(&mut buf).unwrap() {
            out.push(value);
        }
        (out, buf)
    }

    #[test]
    fn test_decode_scalars_in_sequence() {
        let (values, rest) = decode_all(b"+OK\r\n:-42\r\n$6\r\nfoobar\r\n$-1\r\n-ERR boom\r\n");
        assert_eq!(
            values,
            vec![
                RedisValue::SimpleString("OK".into()),
                RedisValue::Integer(-42),
                RedisValue::BulkString(Bytes::from_static(b"foobar")),
                RedisValue::Null,
                RedisValue::Error(RedisError::new("ERR", "boom")),
            ]
        );
        assert!(rest.is_empty());
    }

    #[test]
    fn test_decode_nested_and_empty_arrays() {
        let (values, _) = decode_all(b"*3\r\n*2\r\n:1\r\n:2\r\n*0\r\n*-1\r\n");
        assert_eq!(
            values,
            vec![RedisValue::Array(vec![
                RedisValue::Array(vec![RedisValue::Integer(1), RedisValue::Integer(2)]),
                RedisValue::Array(Vec::new()),
                RedisValue::Null,
            ])]
        );
    }

    #[test]
    fn test_partial_array_consumes_finished_elements() {
        let mut decoder = ReplyDecoder::new();
        let mut buf = BytesMut::from(&b"*3\r\n:1\r\n:2\r\n$5\r\nhel"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert!(decoder.is_mid_reply());
        // Only the unfinished bulk string is left to re-read.
        assert_eq!(&buf[..], b"$5\r\nhel");

        buf.extend_from_slice(b"lo\r\n");
        let value = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(value.as_array().map(|items| items.len()), Some(3));
        assert!(!decoder.is_mid_reply());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_byte_at_a_time_matches_whole_buffer() {
        let wire = b"*2\r\n$3\r\nfoo\r\n*1\r\n+bar\r\n";
        let (whole, _) = decode_all(wire);

        let mut decoder = ReplyDecoder::new();
        let mut buf = BytesMut::new();
        let mut seen = Vec::new();
        for byte in wire {
            buf.put_u8(*byte);
            if let Some(value) = decoder.decode(&mut buf).unwrap() {
                seen.push(value);
            }
        }
        assert_eq!(seen, whole);
    }

    #[test]
    fn test_decode_rejects_bad_streams() {
        let mut decoder = ReplyDecoder::new();
        assert_eq!(
            decoder.decode(&mut BytesMut::from(&b"%1\r\n"[..])),
            Err(DecodeError::UnknownType(b'%'))
        );
        assert_eq!(
            ReplyDecoder::new().decode(&mut BytesMut::from(&b"$3\r\nfooXY"[..])),
            Err(DecodeError::MissingTerminator)
        );
        assert_eq!(
            ReplyDecoder::new().decode(&mut BytesMut::from(&b":x\r\n"[..])),
            Err(DecodeError::BadHeader("integer"))
        );
        let deep = b"*1\r\n".repeat(MAX_NESTING_DEPTH + 1);
        assert_eq!(
            ReplyDecoder::new().decode(&mut BytesMut::from(&deep[..])),
            Err(DecodeError::TooDeep)
        );
    }

    #[test]
    fn test_encode_command() {
        let mut buf = BytesMut::new();
        encode_command(&Command::new("get").arg("key"), &mut buf);
        assert_eq!(&buf[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }
}
