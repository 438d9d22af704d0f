//! Wire protocol types.
//!
//! Trellis speaks RESP2 to the remote store: every request is an array of
//! bulk strings and every reply is one RESP2 value. Replies that carry an
//! error (`-ERR ...`) are decoded into [`RedisError`] so callers can tell a
//! server-side rejection from a broken connection.

pub mod resp2;

pub use resp2::{encode_command, DecodeError, ReplyDecoder};

use bytes::Bytes;

/// A decoded reply.
#[derive(Debug, Clone, PartialEq)]
pub enum RedisValue {
    SimpleString(String),
    Error(RedisError),
    Integer(i64),
    BulkString(Bytes),
    Array(Vec<RedisValue>),
    /// `$-1` or `*-1`.
    Null,
}

impl RedisValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Check if this value is the `+OK` status.
    pub fn is_ok_status(&self) -> bool {
        matches!(self, Self::SimpleString(s) if s == "OK")
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::SimpleString(s) => Some(s),
            Self::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::SimpleString(s) => Some(s.as_bytes()),
            Self::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Integer view; numeric strings count.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::SimpleString(_) | Self::BulkString(_) => self.as_str()?.parse().ok(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RedisValue]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<RedisValue>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Self::BulkString(b) => Some(b),
            Self::SimpleString(s) => Some(Bytes::from(s)),
            _ => None,
        }
    }

    /// Short type label used in protocol error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk string",
            Self::Array(_) => "array",
            Self::Null => "null",
        }
    }
}

/// An error reply from the store, split at the first space into its kind
/// (`ERR`, `WRONGTYPE`, `MOVED`, ...) and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisError {
    pub kind: String,
    pub message: String,
}

impl RedisError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Split a raw error line.
    pub fn parse(line: &str) -> Self {
        match line.split_once(' ') {
            Some((kind, message)) => Self::new(kind, message),
            None => Self::new(line, ""),
        }
    }

    /// Check if the error says the connection is talking to a replica or a
    /// primary that lost its role.
    pub fn is_role_change(&self) -> bool {
        matches!(self.kind.as_str(), "READONLY" | "MASTERDOWN")
    }
}

impl std::fmt::Display for RedisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for RedisError {}

/// A request: command name plus binary-safe arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Uppercased command name.
    pub name: String,
    pub args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_uppercase(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(value.as_ref()));
        self
    }

    /// Append an already-owned argument without copying.
    pub fn arg_owned(mut self, value: Bytes) -> Self {
        self.args.push(value);
        self
    }

    /// Append a number in its decimal form.
    pub fn arg_num(mut self, value: impl std::fmt::Display) -> Self {
        self.args.push(Bytes::from(value.to_string()));
        self
    }

    pub fn args<I, A>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.args
            .extend(values.into_iter().map(|v| Bytes::copy_from_slice(v.as_ref())));
        self
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args
            .get(index)
            .and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn arg_bytes(&self, index: usize) -> Option<&Bytes> {
        self.args.get(index)
    }

    pub fn argc(&self) -> usize {
        self.args.len()
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
