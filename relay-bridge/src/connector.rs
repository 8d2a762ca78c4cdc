//! Authenticated connection to the Instrumental collector.
//!
//! The collector speaks a line protocol over TCP. Before any data, the client sends a `hello`
//! and an `authenticate` line and the collector acknowledges both with `ok`:
//!
//! ```text
//! client -> hello version 1.0
//! client -> authenticate <token>
//! server -> ok
//! server -> ok
//! ```

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use relay_config::Config;

/// The response to a successful handshake.
pub const HANDSHAKE_OK: &[u8; 6] = b"ok\nok\n";

/// Capacity of the handshake response buffer.
const RESPONSE_BUFFER_SIZE: usize = 512;

/// An error establishing a [`Session`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The collector host name could not be resolved.
    #[error("failed to resolve collector address")]
    Lookup(#[source] io::Error),
    /// No TCP connection could be established.
    #[error("failed to connect to collector")]
    Dial(#[source] io::Error),
    /// Sending the handshake failed.
    #[error("failed to send handshake")]
    Handshake(#[source] io::Error),
    /// No handshake response was received.
    #[error("failed to read handshake response")]
    Response(#[source] io::Error),
    /// The collector declined the token.
    #[error("failed to authenticate with token")]
    AuthenticationFailed,
}

impl ConnectError {
    /// Returns `true` if the collector responded but declined the token.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }
}

/// The state of a [`Connector`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// No connection attempt has been made.
    Unconnected,
    /// Dialing the collector.
    Connecting,
    /// Connected, waiting for the handshake to complete.
    Authenticating,
    /// The session is ready for data.
    Authenticated,
    /// Connecting or authenticating failed. This state is final.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An absolute point in time after which I/O fails.
///
/// A deadline beyond the range of the monotonic clock never expires.
#[derive(Clone, Copy, Debug)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Creates a deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now().checked_add(timeout))
    }

    /// Returns the time left until the deadline, or `None` if the deadline never expires.
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] once the deadline has passed.
    pub fn remaining(&self) -> io::Result<Option<Duration>> {
        let Some(deadline) = self.0 else {
            return Ok(None);
        };

        match deadline.checked_duration_since(Instant::now()) {
            Some(remaining) if !remaining.is_zero() => Ok(Some(remaining)),
            _ => Err(deadline_exceeded()),
        }
    }
}

fn deadline_exceeded() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o deadline exceeded")
}

/// Socket timeouts surface as `WouldBlock` on some platforms.
fn map_timeout(error: io::Error) -> io::Error {
    match error.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => deadline_exceeded(),
        _ => error,
    }
}

/// An authenticated connection to the collector.
///
/// All reads and writes share a single deadline that is set once after connecting and never
/// extended. A session that outlives the configured timeout fails on the next I/O operation.
///
/// The connection is closed when the session is dropped.
#[derive(Debug)]
pub struct Session {
    stream: TcpStream,
    deadline: Deadline,
}

impl Session {
    fn new(stream: TcpStream, deadline: Deadline) -> Self {
        Self { stream, deadline }
    }

    /// Returns the address of the collector.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }
}

impl Read for Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_read_timeout(self.deadline.remaining()?)?;
        self.stream.read(buf).map_err(map_timeout)
    }
}

impl Write for Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.set_write_timeout(self.deadline.remaining()?)?;
        self.stream.write(buf).map_err(map_timeout)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// Sends the handshake and validates the collector's response.
///
/// At least six bytes must arrive before the stream ends. Anything other than [`HANDSHAKE_OK`] at
/// the start of the response is an [`AuthenticationFailed`](ConnectError::AuthenticationFailed)
/// error. Bytes following the acknowledgement are ignored.
pub fn authenticate<S>(stream: &mut S, token: &str) -> Result<(), ConnectError>
where
    S: Read + Write,
{
    let handshake = format!("hello version 1.0\nauthenticate {token}\n");
    stream
        .write_all(handshake.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(ConnectError::Handshake)?;

    let mut response = [0; RESPONSE_BUFFER_SIZE];
    let mut received = 0;

    while received < HANDSHAKE_OK.len() {
        match stream.read(&mut response[received..]) {
            Ok(0) if received == 0 => {
                let error = io::Error::from(io::ErrorKind::UnexpectedEof);
                return Err(ConnectError::Response(error));
            }
            Ok(0) => break,
            Ok(read) => received += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return Err(ConnectError::Response(error)),
        }
    }

    if !response[..received].starts_with(HANDSHAKE_OK) {
        return Err(ConnectError::AuthenticationFailed);
    }

    Ok(())
}

/// Dials every resolved address in order and returns the first connection.
fn dial(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, ConnectError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(ConnectError::Lookup)?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                relay_log::debug!("failed to connect to {addr}: {error}");
                last_error = Some(error);
            }
        }
    }

    Err(match last_error {
        Some(error) => ConnectError::Dial(error),
        None => ConnectError::Lookup(io::Error::new(
            io::ErrorKind::NotFound,
            "no addresses found for collector host",
        )),
    })
}

/// Establishes authenticated [`Session`]s with the collector.
#[derive(Debug)]
pub struct Connector<'a> {
    config: &'a Config,
    state: ConnectionState,
}

impl<'a> Connector<'a> {
    /// Creates an unconnected connector.
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            state: ConnectionState::Unconnected,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, state: ConnectionState) {
        relay_log::debug!("collector connection {} -> {}", self.state, state);
        self.state = state;
    }

    /// Connects to the collector and performs the handshake.
    ///
    /// The configured timeout bounds the dial and, from the moment the connection is established,
    /// the entire session including the handshake.
    pub fn connect(&mut self) -> Result<Session, ConnectError> {
        match self.try_connect() {
            Ok(session) => {
                self.transition(ConnectionState::Authenticated);
                Ok(session)
            }
            Err(error) => {
                self.transition(ConnectionState::Failed);
                Err(error)
            }
        }
    }

    fn try_connect(&mut self) -> Result<Session, ConnectError> {
        let timeout = self.config.timeout();
        let host = self.config.upstream_host();
        let port = self.config.upstream_port();

        self.transition(ConnectionState::Connecting);
        let stream = dial(host, port, timeout)?;
        stream.set_nodelay(true).map_err(ConnectError::Dial)?;

        let mut session = Session::new(stream, Deadline::after(timeout));

        self.transition(ConnectionState::Authenticating);
        authenticate(&mut session, self.config.token().unwrap_or_default())?;

        Ok(session)
    }
}
