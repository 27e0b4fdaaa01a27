//! RESP2 parser and encoder.
//!
//! RESP2 types:
//! - Simple Strings (+)
//! - Errors (-)
//! - Integers (:)
//! - Bulk Strings ($)
//! - Arrays (*)
//! - Null (represented as $-1 or *-1)

use super::{ParseResult, RespType, MAX_BULK_SIZE, MAX_ELEMENTS, MAX_NESTING_DEPTH};
use crate::backend::redis::{RedisCommand, RedisError, RedisValue};
use bytes::Bytes;

/// RESP2 parser.
#[derive(Debug, Default)]
pub struct Resp2Parser {
    /// Current nesting depth.
    depth: usize,
}

impl Resp2Parser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one value from the front of the buffer.
    ///
    /// On success the result carries the number of bytes the value spans so
    /// the caller can advance its read buffer.
    pub fn parse(&mut self, data: &[u8]) -> ParseResult {
        self.depth = 0;
        self.parse_value(data)
    }

    fn parse_value(&mut self, data: &[u8]) -> ParseResult {
        if data.is_empty() {
            return ParseResult::Incomplete;
        }

        if self.depth > MAX_NESTING_DEPTH {
            return ParseResult::Error("maximum nesting depth exceeded".to_string());
        }

        let body = &data[1..];
        let result = match RespType::from_byte(data[0]) {
            Some(RespType::SimpleString) => parse_simple_string(body),
            Some(RespType::Error) => parse_error(body),
            Some(RespType::Integer) => parse_integer(body),
            Some(RespType::BulkString) => parse_bulk_string(body),
            Some(RespType::Array) => self.parse_array(body),
            None => {
                return ParseResult::Error(format!("unexpected type byte 0x{:02x}", data[0]));
            }
        };

        // account for the prefix byte
        match result {
            ParseResult::Ok { value, consumed } => ParseResult::Ok {
                value,
                consumed: consumed + 1,
            },
            other => other,
        }
    }

    /// Parse an array body (`2\r\n...`).
    fn parse_array(&mut self, data: &[u8]) -> ParseResult {
        let Some(len_pos) = find_crlf(data) else {
            return ParseResult::Incomplete;
        };

        let len = match parse_length(&data[..len_pos]) {
            Some(-1) => {
                return ParseResult::Ok {
                    value: RedisValue::Null,
                    consumed: len_pos + 2,
                };
            }
            Some(len) if len >= 0 => len as usize,
            _ => return ParseResult::Error("invalid array length".to_string()),
        };

        if len > MAX_ELEMENTS {
            return ParseResult::Error(format!("array too large: {} > {}", len, MAX_ELEMENTS));
        }

        self.depth += 1;
        let mut elements = Vec::with_capacity(len.min(1024));
        let mut offset = len_pos + 2;

        for _ in 0..len {
            match self.parse_value(&data[offset..]) {
                ParseResult::Ok { value, consumed } => {
                    elements.push(value);
                    offset += consumed;
                }
                other => {
                    self.depth -= 1;
                    return other;
                }
            }
        }

        self.depth -= 1;
        ParseResult::Ok {
            value: RedisValue::Array(elements),
            consumed: offset,
        }
    }
}

/// Parse a simple string body (`OK\r\n`).
fn parse_simple_string(data: &[u8]) -> ParseResult {
    match find_crlf(data) {
        Some(pos) => ParseResult::Ok {
            value: RedisValue::SimpleString(String::from_utf8_lossy(&data[..pos]).to_string()),
            consumed: pos + 2,
        },
        None => ParseResult::Incomplete,
    }
}

/// Parse an error body (`ERR message\r\n`).
fn parse_error(data: &[u8]) -> ParseResult {
    match find_crlf(data) {
        Some(pos) => {
            let s = String::from_utf8_lossy(&data[..pos]).to_string();
            let (kind, message) = parse_error_string(&s);
            ParseResult::Ok {
                value: RedisValue::Error(RedisError { kind, message }),
                consumed: pos + 2,
            }
        }
        None => ParseResult::Incomplete,
    }
}

/// Parse an integer body (`1000\r\n`).
fn parse_integer(data: &[u8]) -> ParseResult {
    match find_crlf(data) {
        Some(pos) => match parse_length(&data[..pos]) {
            Some(n) => ParseResult::Ok {
                value: RedisValue::Integer(n),
                consumed: pos + 2,
            },
            None => ParseResult::Error("invalid integer".to_string()),
        },
        None => ParseResult::Incomplete,
    }
}

/// Parse a bulk string body (`6\r\nfoobar\r\n`).
fn parse_bulk_string(data: &[u8]) -> ParseResult {
    let Some(len_pos) = find_crlf(data) else {
        return ParseResult::Incomplete;
    };

    let len = match parse_length(&data[..len_pos]) {
        Some(-1) => {
            return ParseResult::Ok {
                value: RedisValue::Null,
                consumed: len_pos + 2,
            };
        }
        Some(len) if len >= 0 => len as usize,
        _ => return ParseResult::Error("invalid bulk string length".to_string()),
    };

    if len > MAX_BULK_SIZE {
        return ParseResult::Error(format!(
            "bulk string too large: {} > {}",
            len, MAX_BULK_SIZE
        ));
    }

    let data_start = len_pos + 2;
    let data_end = data_start + len;

    if data.len() < data_end + 2 {
        return ParseResult::Incomplete;
    }

    if &data[data_end..data_end + 2] != b"\r\n" {
        return ParseResult::Error("missing CRLF after bulk string".to_string());
    }

    ParseResult::Ok {
        value: RedisValue::BulkString(Bytes::copy_from_slice(&data[data_start..data_end])),
        consumed: data_end + 2,
    }
}

/// RESP2 encoder.
#[derive(Debug, Default)]
pub struct Resp2Encoder;

impl Resp2Encoder {
    /// Encode a value to bytes.
    pub fn encode(value: &RedisValue) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        Self::encode_into(value, &mut buf);
        buf
    }

    /// Encode a command as an array of bulk strings.
    pub fn encode_command(command: &RedisCommand, buf: &mut Vec<u8>) {
        buf.push(b'*');
        buf.extend_from_slice((command.args.len() + 1).to_string().as_bytes());
        buf.extend_from_slice(b"\r\n");
        write_bulk(command.name.as_bytes(), buf);
        for arg in &command.args {
            write_bulk(arg, buf);
        }
    }

    /// Encode a value into a buffer.
    pub fn encode_into(value: &RedisValue, buf: &mut Vec<u8>) {
        match value {
            RedisValue::SimpleString(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RedisValue::Error(e) => {
                buf.push(b'-');
                buf.extend_from_slice(e.kind.as_bytes());
                buf.push(b' ');
                buf.extend_from_slice(e.message.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RedisValue::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RedisValue::BulkString(data) => write_bulk(data, buf),
            RedisValue::Array(elements) => {
                buf.push(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for elem in elements {
                    Self::encode_into(elem, buf);
                }
            }
            RedisValue::Null => {
                buf.extend_from_slice(b"$-1\r\n");
            }
        }
    }
}

fn write_bulk(data: &[u8], buf: &mut Vec<u8>) {
    buf.push(b'$');
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// Find CRLF in data, returning position of first \r.
fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

fn parse_length(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

/// Parse error string into kind and message.
fn parse_error_string(s: &str) -> (String, String) {
    if let Some(pos) = s.find(' ') {
        (s[..pos].to_string(), s[pos + 1..].to_string())
    } else {
        (s.to_string(), String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(data: &[u8]) -> (RedisValue, usize) {
        match Resp2Parser::new().parse(data) {
            ParseResult::Ok { value, consumed } => (value, consumed),
            other => panic!("expected value, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_string() {
        let (value, consumed) = parse_ok(b"+OK\r\n");
        assert!(value.is_ok_status());
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_error() {
        let (value, _) = parse_ok(b"-WRONGTYPE Operation against a key\r\n");
        assert!(
            matches!(value, RedisValue::Error(e) if e.kind == "WRONGTYPE" && e.message == "Operation against a key")
        );
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_ok(b":1000\r\n"), (RedisValue::Integer(1000), 7));
        assert_eq!(parse_ok(b":-42\r\n"), (RedisValue::Integer(-42), 6));
    }

    #[test]
    fn test_parse_bulk_string() {
        let (value, consumed) = parse_ok(b"$6\r\nfoobar\r\n");
        assert_eq!(value, RedisValue::BulkString(Bytes::from("foobar")));
        assert_eq!(consumed, 12);

        let (value, consumed) = parse_ok(b"$0\r\n\r\n");
        assert_eq!(value, RedisValue::BulkString(Bytes::new()));
        assert_eq!(consumed, 6);
    }

    #[test]
    fn test_parse_nulls() {
        assert_eq!(parse_ok(b"$-1\r\n"), (RedisValue::Null, 5));
        assert_eq!(parse_ok(b"*-1\r\n"), (RedisValue::Null, 5));
    }

    #[test]
    fn test_parse_exec_reply() {
        let data = b"*3\r\n+OK\r\n:11\r\n-WRONGTYPE bad\r\n+QUEUED\r\n";
        let (value, consumed) = parse_ok(data);
        let RedisValue::Array(items) = value else {
            panic!("expected array, got {:?}", value);
        };
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok_status());
        assert_eq!(items[1], RedisValue::Integer(11));
        assert!(items[2].is_error());
        // trailing reply left in the buffer
        assert_eq!(&data[consumed..], b"+QUEUED\r\n");
    }

    #[test]
    fn test_parse_nested_array() {
        let (value, consumed) = parse_ok(b"*2\r\n*2\r\n:1\r\n:2\r\n*0\r\n");
        let RedisValue::Array(outer) = value else {
            panic!("expected array, got {:?}", value);
        };
        assert_eq!(outer.len(), 2);
        assert_eq!(outer[1], RedisValue::Array(vec![]));
        assert_eq!(consumed, 20);
    }

    #[test]
    fn test_parse_incomplete() {
        let mut parser = Resp2Parser::new();
        assert!(matches!(parser.parse(b""), ParseResult::Incomplete));
        assert!(matches!(parser.parse(b"+OK"), ParseResult::Incomplete));
        assert!(matches!(parser.parse(b"$6\r\nfoo"), ParseResult::Incomplete));
        assert!(matches!(
            parser.parse(b"*2\r\n$3\r\nfoo\r\n"),
            ParseResult::Incomplete
        ));
    }

    #[test]
    fn test_parse_invalid() {
        let mut parser = Resp2Parser::new();
        assert!(matches!(parser.parse(b"%1\r\n"), ParseResult::Error(_)));
        assert!(matches!(parser.parse(b":abc\r\n"), ParseResult::Error(_)));
        assert!(matches!(parser.parse(b"$3\r\nfoobar\r\n"), ParseResult::Error(_)));
    }

    #[test]
    fn test_encode_command() {
        let cmd = RedisCommand::new(
            "SET",
            vec![Bytes::from("key"), Bytes::from("value"), Bytes::from("PX"), Bytes::from("1000")],
        );
        let mut buf = Vec::new();
        Resp2Encoder::encode_command(&cmd, &mut buf);
        assert_eq!(
            buf,
            b"*5\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n$2\r\nPX\r\n$4\r\n1000\r\n"
        );
    }

    #[test]
    fn test_encode_values() {
        assert_eq!(Resp2Encoder::encode(&RedisValue::ok()), b"+OK\r\n");
        assert_eq!(
            Resp2Encoder::encode(&RedisValue::Error(RedisError::new("ERR", "something wrong"))),
            b"-ERR something wrong\r\n"
        );
        assert_eq!(Resp2Encoder::encode(&RedisValue::Integer(-100)), b":-100\r\n");
        assert_eq!(Resp2Encoder::encode(&RedisValue::Null), b"$-1\r\n");
    }

    #[test]
    fn test_parse_pipelined_replies() {
        let data = b"+OK\r\n:3\r\n:4\r\n";
        let mut parser = Resp2Parser::new();
        let mut offset = 0;
        let mut replies = Vec::new();
        while let ParseResult::Ok { value, consumed } = parser.parse(&data[offset..]) {
            replies.push(value);
            offset += consumed;
        }
        assert_eq!(
            replies,
            vec![RedisValue::ok(), RedisValue::Integer(3), RedisValue::Integer(4)]
        );
        assert_eq!(offset, data.len());
    }
}
