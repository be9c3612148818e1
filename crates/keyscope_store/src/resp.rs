//! RESP (REdis Serialization Protocol) framing.
//!
//! Commands go out as arrays of bulk strings. Replies are parsed incrementally:
//! [`parse_reply`] returns [`ParseStatus::Incomplete`] until the buffer holds a
//! whole frame, so the caller can keep reading from the socket and try again.

use crate::error::{StoreError, StoreResult};
use tracing::warn;

/// A decoded server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+OK`
    Simple(String),
    /// `-ERR message`
    Error(String),
    /// `:42`
    Integer(i64),
    /// `$3\r\nfoo`
    Bulk(Vec<u8>),
    /// `$-1` or `*-1`
    Null,
    /// `*2\r\n...`
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Converts an error reply into a [`StoreError`], passing other values through.
    pub fn into_result(self) -> StoreResult<RespValue> {
        match self {
            RespValue::Error(message) if message.starts_with("WRONGTYPE") => {
                Err(StoreError::WrongType)
            }
            RespValue::Error(message) => Err(StoreError::Server(message)),
            other => Ok(other),
        }
    }

    /// Interprets the reply as text, accepting simple and bulk strings.
    pub fn into_string(self) -> StoreResult<String> {
        match self {
            RespValue::Simple(text) => Ok(text),
            RespValue::Bulk(bytes) => String::from_utf8(bytes)
                .map_err(|e| StoreError::Protocol(format!("reply is not UTF-8: {e}"))),
            other => Err(unexpected("string", &other)),
        }
    }

    /// Interprets the reply as an integer.
    pub fn into_integer(self) -> StoreResult<i64> {
        match self {
            RespValue::Integer(value) => Ok(value),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Interprets the reply as an array of strings. `Null` is an empty array.
    pub fn into_string_array(self) -> StoreResult<Vec<String>> {
        match self {
            RespValue::Array(items) => items.into_iter().map(RespValue::into_string).collect(),
            RespValue::Null => Ok(Vec::new()),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Interprets the reply as an array of keys. `Null` is an empty array.
    ///
    /// Keys are binary-safe on the server; one that is not UTF-8 is decoded
    /// lossily rather than failing the whole reply.
    pub fn into_key_array(self) -> StoreResult<Vec<String>> {
        match self {
            RespValue::Array(items) => items.into_iter().map(RespValue::into_key).collect(),
            RespValue::Null => Ok(Vec::new()),
            other => Err(unexpected("array", &other)),
        }
    }

    fn into_key(self) -> StoreResult<String> {
        match self {
            RespValue::Bulk(bytes) => Ok(match String::from_utf8(bytes) {
                Ok(key) => key,
                Err(e) => {
                    let key = String::from_utf8_lossy(e.as_bytes()).into_owned();
                    warn!(key = %key, "resp.key_not_utf8");
                    key
                }
            }),
            other => other.into_string(),
        }
    }
}

fn unexpected(wanted: &str, got: &RespValue) -> StoreError {
    StoreError::Protocol(format!("expected {wanted} reply, got {got:?}"))
}

/// Outcome of one parse attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseStatus {
    /// More bytes are required.
    Incomplete,
    /// One reply was decoded from the first `consumed` bytes.
    Complete {
        /// The decoded reply.
        value: RespValue,
        /// Number of bytes the reply occupied.
        consumed: usize,
    },
}

/// Encodes a command as a RESP array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let payload: usize = args.iter().map(|arg| arg.len() + 16).sum();
    let mut output = Vec::with_capacity(payload + 16);
    output.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        output.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        output.extend_from_slice(arg);
        output.extend_from_slice(b"\r\n");
    }
    output
}

/// Tries to decode one reply from the start of `buf`.
///
/// # Errors
///
/// Returns `StoreError::Protocol` when the bytes cannot be a RESP reply.
pub fn parse_reply(buf: &[u8]) -> StoreResult<ParseStatus> {
    Ok(match parse_at(buf, 0)? {
        Some((value, consumed)) => ParseStatus::Complete { value, consumed },
        None => ParseStatus::Incomplete,
    })
}

fn parse_at(buf: &[u8], start: usize) -> StoreResult<Option<(RespValue, usize)>> {
    let Some((line, after_line)) = read_line(buf, start) else {
        return Ok(None);
    };
    let Some((&kind, rest)) = line.split_first() else {
        return Err(StoreError::Protocol("empty reply line".into()));
    };

    match kind {
        b'+' => Ok(Some((RespValue::Simple(text(rest)?), after_line))),
        b'-' => Ok(Some((RespValue::Error(text(rest)?), after_line))),
        b':' => Ok(Some((RespValue::Integer(number(rest)?), after_line))),
        b'$' => {
            let len = number(rest)?;
            if len < 0 {
                return Ok(Some((RespValue::Null, after_line)));
            }
            let end = after_line + len as usize;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(StoreError::Protocol("bulk string not terminated".into()));
            }
            Ok(Some((RespValue::Bulk(buf[after_line..end].to_vec()), end + 2)))
        }
        b'*' => {
            let len = number(rest)?;
            if len < 0 {
                return Ok(Some((RespValue::Null, after_line)));
            }
            let mut items = Vec::with_capacity(len.min(1024) as usize);
            let mut cursor = after_line;
            for _ in 0..len {
                match parse_at(buf, cursor)? {
                    Some((item, next)) => {
                        items.push(item);
                        cursor = next;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((RespValue::Array(items), cursor)))
        }
        other => Err(StoreError::Protocol(format!(
            "unknown reply type byte 0x{other:02x}"
        ))),
    }
}

/// Returns the line starting at `start` without its CRLF, and the offset after it.
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let tail = buf.get(start..)?;
    let end = tail.windows(2).position(|window| window == b"\r\n")?;
    Some((&tail[..end], start + end + 2))
}

fn text(bytes: &[u8]) -> StoreResult<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| StoreError::Protocol(format!("reply line is not UTF-8: {e}")))
}

fn number(bytes: &[u8]) -> StoreResult<i64> {
    text(bytes)?
        .parse()
        .map_err(|_| StoreError::Protocol(format!("invalid length or integer {bytes:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(buf: &[u8]) -> (RespValue, usize) {
        match parse_reply(buf).unwrap() {
            ParseStatus::Complete { value, consumed } => (value, consumed),
            ParseStatus::Incomplete => panic!("expected a complete reply"),
        }
    }

    #[test]
    fn encode_select() {
        assert_eq!(
            encode_command(&[b"SELECT", b"3"]),
            b"*2\r\n$6\r\nSELECT\r\n$1\r\n3\r\n".to_vec()
        );
    }

    #[test]
    fn parse_scalars() {
        assert_eq!(complete(b"+OK\r\n"), (RespValue::Simple("OK".into()), 5));
        assert_eq!(complete(b":1024\r\n").0, RespValue::Integer(1024));
        assert_eq!(complete(b"$-1\r\n").0, RespValue::Null);
        assert_eq!(
            complete(b"-ERR invalid password\r\n").0,
            RespValue::Error("ERR invalid password".into())
        );
    }

    #[test]
    fn key_array_decodes_binary_keys_lossily() {
        let (value, _) = complete(b"*2\r\n$2\r\nok\r\n$2\r\n\xff\xfe\r\n");
        assert!(matches!(
            value.clone().into_string_array(),
            Err(StoreError::Protocol(_))
        ));

        let keys = value.into_key_array().unwrap();
        assert_eq!(keys, vec!["ok".to_string(), "\u{fffd}\u{fffd}".to_string()]);
        assert_eq!(RespValue::Null.into_key_array().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn parse_bulk_with_embedded_crlf() {
        let (value, consumed) = complete(b"$4\r\na\r\nb\r\n");
        assert_eq!(value, RespValue::Bulk(b"a\r\nb".to_vec()));
        assert_eq!(consumed, 10);
    }

    #[test]
    fn parse_config_get_reply() {
        let (value, _) = complete(b"*2\r\n$9\r\ndatabases\r\n$2\r\n16\r\n");
        assert_eq!(
            value.into_string_array().unwrap(),
            vec!["databases".to_string(), "16".to_string()]
        );
    }

    #[test]
    fn parse_waits_for_more_bytes() {
        assert_eq!(parse_reply(b"").unwrap(), ParseStatus::Incomplete);
        assert_eq!(parse_reply(b"$5\r\nhel").unwrap(), ParseStatus::Incomplete);
        assert_eq!(
            parse_reply(b"*2\r\n$1\r\na\r\n").unwrap(),
            ParseStatus::Incomplete
        );
    }

    #[test]
    fn parse_leaves_trailing_bytes() {
        let (value, consumed) = complete(b"+OK\r\n:1\r\n");
        assert_eq!(value, RespValue::Simple("OK".into()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn parse_rejects_unknown_type() {
        assert!(matches!(
            parse_reply(b"?what\r\n"),
            Err(StoreError::Protocol(_))
        ));
    }

    #[test]
    fn wrongtype_error_maps_to_wrong_type() {
        let reply = RespValue::Error("WRONGTYPE Operation against a key".into());
        assert!(matches!(reply.into_result(), Err(StoreError::WrongType)));
    }
}
