//! Connections to a single node.
//!
//! A [`Link`] is one established connection speaking RESP2. A [`Dialer`]
//! opens links; the default [`TcpDialer`] connects over TCP with the
//! configured timeouts and runs the AUTH/SELECT handshake. Tests and local
//! development can plug in any other dialer, such as the in-process
//! `MemoryDialer` built with the `testing` feature.

use crate::protocol::{encode_command, Command, DecodeError, RedisError, RedisValue, ReplyDecoder};
use bytes::BytesMut;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Port used when an endpoint omits one.
pub const DEFAULT_PORT: u16 = 6379;

const READ_CHUNK: usize = 16 * 1024;

/// A node address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = String;

    /// Parse "host:port" or "host" (port 6379).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty node address".to_string());
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port in node address '{}'", s))?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(format!("missing host in node address '{}'", s)),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub password: Option<String>,
    /// Database selected after connecting; 0 skips SELECT.
    pub database: u32,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            password: None,
            database: 0,
        }
    }
}

impl LinkSettings {
    /// Settings for talking to discovery endpoints: same timeouts, no
    /// credentials or database.
    pub fn discovery(&self) -> Self {
        Self {
            password: None,
            database: 0,
            ..self.clone()
        }
    }
}

/// Cluster redirect kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// The slot moved permanently.
    Moved,
    /// The slot is migrating; retry once on the target after ASKING.
    Ask,
}

/// A cluster redirect reply (`MOVED 3999 10.0.0.2:6379`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub kind: RedirectKind,
    pub slot: u16,
    pub endpoint: Endpoint,
}

impl Redirect {
    /// Recognize a redirect in an error reply.
    pub fn from_reply(error: &RedisError) -> Option<Self> {
        let kind = match error.kind.as_str() {
            "MOVED" => RedirectKind::Moved,
            "ASK" => RedirectKind::Ask,
            _ => return None,
        };
        let mut parts = error.message.split_whitespace();
        let slot = parts.next()?.parse().ok()?;
        let endpoint = parts.next()?.parse().ok()?;
        Some(Self {
            kind,
            slot,
            endpoint,
        })
    }
}

impl std::fmt::Display for Redirect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            RedirectKind::Moved => "MOVED",
            RedirectKind::Ask => "ASK",
        };
        write!(f, "{} {} {}", kind, self.slot, self.endpoint)
    }
}

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("malformed reply: {0}")]
    Decode(#[from] DecodeError),

    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Reply(RedisError),

    #[error("redirected: {0}")]
    Redirect(Redirect),

    #[error("no connection to {endpoint} became available within {waited:?}")]
    PoolExhausted { endpoint: Endpoint, waited: Duration },

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("connection closed by {0}")]
    Closed(Endpoint),
}

impl LinkError {
    /// Check if the failure is transient (network, timeout, pool pressure).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Timeout(_)
                | Self::PoolExhausted { .. }
                | Self::Discovery(_)
                | Self::Closed(_)
        )
    }

    /// Check if the connection that produced this error must be discarded.
    ///
    /// After an I/O, timeout or framing failure the reply stream may be out
    /// of step with the request stream. Error replies leave it intact.
    pub fn poisons_link(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::Protocol(_) | Self::Decode(_) | Self::Closed(_)
        )
    }

    /// Check if the failure suggests the connector's view of the deployment
    /// (primary address, slot owners) is out of date.
    pub fn unsettles_topology(&self) -> bool {
        match self {
            Self::Reply(error) => error.is_role_change(),
            Self::Redirect(_) => false,
            other => other.poisons_link(),
        }
    }

    /// Build the typed error for an unexpected reply shape.
    pub fn unexpected(expected: &str, got: &RedisValue) -> Self {
        Self::Protocol(format!("expected {}, got {}", expected, got.kind()))
    }
}

/// Result type using LinkError.
pub type LinkResult<T> = Result<T, LinkError>;

/// Turn an error reply into the matching [`LinkError`].
pub fn check_reply(value: RedisValue) -> LinkResult<RedisValue> {
    match value {
        RedisValue::Error(error) => match Redirect::from_reply(&error) {
            Some(redirect) => Err(LinkError::Redirect(redirect)),
            None => Err(LinkError::Reply(error)),
        },
        other => Ok(other),
    }
}

/// One established connection to a node.
pub trait Link: Send {
    /// The node this link talks to.
    fn endpoint(&self) -> &Endpoint;

    /// Send every command, then read one reply per command, in order.
    /// Error replies are returned inline as [`RedisValue::Error`].
    fn exchange(&mut self, commands: &[Command]) -> LinkResult<Vec<RedisValue>>;

    /// Send one command and read its reply. Error replies become
    /// [`LinkError::Reply`] or [`LinkError::Redirect`].
    fn request(&mut self, command: &Command) -> LinkResult<RedisValue> {
        let reply = self
            .exchange(std::slice::from_ref(command))?
            .pop()
            .ok_or_else(|| LinkError::Protocol("missing reply".to_string()))?;
        check_reply(reply)
    }

    /// Send a batch in one round trip. Replies are positional; per-command
    /// error replies stay inline.
    fn pipeline(&mut self, commands: &[Command]) -> LinkResult<Vec<RedisValue>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        self.exchange(commands)
    }
}

/// Opens links to nodes.
pub trait Dialer: Send + Sync {
    fn dial(&self, endpoint: &Endpoint, settings: &LinkSettings) -> LinkResult<Box<dyn Link>>;
}

/// Run the connection handshake: AUTH when a password is set, SELECT when a
/// database other than 0 is requested.
pub fn handshake(link: &mut dyn Link, settings: &LinkSettings) -> LinkResult<()> {
    if let Some(ref password) = settings.password {
        link.request(&Command::new("AUTH").arg(password))?;
    }
    if settings.database != 0 {
        link.request(&Command::new("SELECT").arg_num(settings.database))?;
    }
    Ok(())
}

/// Dials nodes over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, endpoint: &Endpoint, settings: &LinkSettings) -> LinkResult<Box<dyn Link>> {
        let mut link = TcpLink::connect(endpoint, settings)?;
        handshake(&mut link, settings)?;
        tracing::debug!(endpoint = %endpoint, "connection established");
        Ok(Box::new(link))
    }
}

/// A RESP2 connection over TCP.
pub struct TcpLink {
    endpoint: Endpoint,
    stream: TcpStream,
    read_timeout: Duration,
    buffer: BytesMut,
    decoder: ReplyDecoder,
}

impl TcpLink {
    /// Connect with the configured timeouts.
    pub fn connect(endpoint: &Endpoint, settings: &LinkSettings) -> LinkResult<Self> {
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()?
            .collect();
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, settings.connect_timeout) {
                Ok(stream) => return Self::from_stream(endpoint.clone(), stream, settings),
                Err(e) => last_error = Some(e),
            }
        }
        Err(match last_error {
            Some(e) if is_timeout(&e) => LinkError::Timeout(settings.connect_timeout),
            Some(e) => LinkError::Io(e),
            None => LinkError::Protocol(format!("{} did not resolve to any address", endpoint)),
        })
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(
        endpoint: Endpoint,
        stream: TcpStream,
        settings: &LinkSettings,
    ) -> LinkResult<Self> {
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(settings.read_timeout))?;
        stream.set_write_timeout(Some(settings.read_timeout))?;
        Ok(Self {
            endpoint,
            stream,
            read_timeout: settings.read_timeout,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            decoder: ReplyDecoder::new(),
        })
    }

    fn read_reply(&mut self) -> LinkResult<RedisValue> {
        loop {
            if let Some(value) = self.decoder.decode(&mut self.buffer)? {
                return Ok(value);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).map_err(|e| self.io_error(e))?;
            if n == 0 {
                return Err(LinkError::Closed(self.endpoint.clone()));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn io_error(&self, error: std::io::Error) -> LinkError {
        if is_timeout(&error) {
            LinkError::Timeout(self.read_timeout)
        } else {
            LinkError::Io(error)
        }
    }
}

impl Link for TcpLink {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn exchange(&mut self, commands: &[Command]) -> LinkResult<Vec<RedisValue>> {
        let mut out = BytesMut::with_capacity(64 * commands.len());
        for command in commands {
            encode_command(command, &mut out);
        }
        self.stream
            .write_all(&out)
            .and_then(|_| self.stream.flush())
            .map_err(|e| self.io_error(e))?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in commands {
            replies.push(self.read_reply()?);
        }
        Ok(replies)
    }
}

fn is_timeout(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_endpoint_parse() {
        assert_eq!(
            "10.0.0.1:7000".parse::<Endpoint>().unwrap(),
            Endpoint::new("10.0.0.1", 7000)
        );
        assert_eq!(
            "cache.local".parse::<Endpoint>().unwrap(),
            Endpoint::new("cache.local", DEFAULT_PORT)
        );
        assert!("host:notaport".parse::<Endpoint>().is_err());
        assert!(":6379".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_redirect_from_reply() {
        let moved = RedisError::new("MOVED", "3999 127.0.0.1:6381");
        let redirect = Redirect::from_reply(&moved).unwrap();
        assert_eq!(redirect.kind, RedirectKind::Moved);
        assert_eq!(redirect.slot, 3999);
        assert_eq!(redirect.endpoint, Endpoint::new("127.0.0.1", 6381));

        let wrong_type = RedisError::new("WRONGTYPE", "Operation against a key holding the wrong kind of value");
        assert!(Redirect::from_reply(&wrong_type).is_none());
    }

    #[test]
    fn test_error_classification() {
        assert!(!LinkError::Reply(RedisError::new("WRONGTYPE", "list")).poisons_link());
        assert!(LinkError::Reply(RedisError::new("READONLY", "replica")).unsettles_topology());
        assert!(LinkError::Decode(DecodeError::TooDeep).poisons_link());
        assert!(LinkError::Timeout(Duration::from_millis(5)).poisons_link());
        assert!(!LinkError::PoolExhausted {
            endpoint: Endpoint::new("h", 1),
            waited: Duration::ZERO
        }
        .poisons_link());
    }

    /// Serve canned replies, one per request line group, from a local socket.
    fn serve(replies: &'static [&'static [u8]]) -> Endpoint {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            for reply in replies {
                // Each request is "*N" followed by N bulk strings (2 lines each).
                let mut header = String::new();
                if reader.read_line(&mut header).unwrap() == 0 {
                    return;
                }
                let argc: usize = header.trim_start_matches('*').trim().parse().unwrap();
                for _ in 0..argc * 2 {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                }
                writer.write_all(reply).unwrap();
            }
        });
        Endpoint::new("127.0.0.1", port)
    }

    #[test]
    fn test_tcp_link_request_and_pipeline() {
        let endpoint = serve(&[b"+OK\r\n", b"$3\r\nbar\r\n", b":1\r\n", b"-WRONGTYPE nope\r\n"]);
        let mut link = TcpLink::connect(&endpoint, &LinkSettings::default()).unwrap();

        let reply = link
            .request(&Command::new("SET").arg("foo").arg("bar"))
            .unwrap();
        assert!(reply.is_ok_status());

        let replies = link
            .pipeline(&[
                Command::new("GET").arg("foo"),
                Command::new("DEL").arg("foo"),
                Command::new("LPUSH").arg("foo").arg("x"),
            ])
            .unwrap();
        assert_eq!(replies[0].as_bytes(), Some(&b"bar"[..]));
        assert_eq!(replies[1], RedisValue::Integer(1));
        assert!(replies[2].is_error());
    }

    #[test]
    fn test_tcp_link_reports_closed_peer() {
        let endpoint = serve(&[]);
        let mut link = TcpLink::connect(&endpoint, &LinkSettings::default()).unwrap();
        let err = link.request(&Command::new("PING")).unwrap_err();
        assert!(err.poisons_link());
    }
}
