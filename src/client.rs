//! The RNDC session layer: connection lifecycle, handshake, command
//! exchange and the retry engine.

use std::{
    fmt,
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use base64::{engine::general_purpose::STANDARD, Engine};
use indexmap::IndexMap;
use log::{debug, warn};

use crate::{
    auth::{self, Algorithm},
    message::{read_frame, write_frame, Message, SerialiseMode},
    Config, Error, Map, Value,
};

/// Default per-operation I/O timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause between retry attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Seconds until an outbound message's `_exp` timestamp.
const MESSAGE_LIFETIME_SECS: u64 = 60;

/// A response `_data` map with keys lifted to strings.
pub type Response = IndexMap<String, ResponseValue>;

/// A single field of a server response.
///
/// The wire format carries opaque bytes; leaves that decode as
/// well-formed UTF-8 are lifted to [`Text`](Self::Text), everything
/// else stays binary.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseValue {
    /// A leaf holding well-formed UTF-8.
    Text(String),

    /// A leaf that did not decode as UTF-8.
    Binary(Vec<u8>),

    /// A nested response map.
    Map(Response),

    /// A sequence of response values.
    List(Vec<ResponseValue>),
}

impl ResponseValue {
    /// Returns the text of a [`Text`](Self::Text) leaf.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Binary(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Self::Map(m) => {
                let mut first = true;
                for (k, v) in m {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{k}: {v}")?;
                }
                Ok(())
            }
            Self::List(items) => {
                let mut first = true;
                for v in items {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    }
}

/// Builder for an [`RndcClient`].
///
/// Input validation happens in [`build`](Self::build), before any
/// socket operation.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    host: String,
    port: u16,
    algorithm: Algorithm,
    secret: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl ClientBuilder {
    /// Sets the per-operation I/O timeout (default 10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of retries after the initial attempt (default 3).
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the pause between retry attempts (default 500 ms).
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Validates the configuration and constructs the client.
    ///
    /// No socket is opened; that happens on the first
    /// [`connect`](RndcClient::connect) or [`call`](RndcClient::call).
    pub fn build(self) -> Result<RndcClient, Error> {
        if self.host.is_empty() {
            return Err(Error::InvalidHost);
        }
        if self.port == 0 {
            return Err(Error::InvalidPort);
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidTimeout);
        }

        let key = STANDARD
            .decode(&self.secret)
            .map_err(|e| Error::InvalidSecret(e.to_string()))?;
        if key.is_empty() {
            return Err(Error::EmptySecret);
        }

        Ok(RndcClient {
            host: self.host,
            port: self.port,
            algorithm: self.algorithm,
            key,
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            stream: None,
            serial: 1,
            nonce: None,
        })
    }
}

/// A blocking RNDC control-channel session.
///
/// A client is a single-owner, synchronous object: operations block the
/// calling thread on socket I/O, exchanges are strictly ordered, and
/// there is no internal concurrency. To multiplex commands, create
/// multiple clients.
///
/// The socket is released on [`close`](Self::close) and on drop, so a
/// client acquired in a scope is released on every exit path.
#[derive(Debug)]
pub struct RndcClient {
    host: String,
    port: u16,
    algorithm: Algorithm,
    key: Vec<u8>,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,

    stream: Option<TcpStream>,
    serial: u32,
    nonce: Option<Vec<u8>>,
}

impl RndcClient {
    /// Starts building a client for the server at `host:port`.
    ///
    /// `secret` is the base64-encoded shared key, as it appears in the
    /// server's `key` clause.
    pub fn builder(
        host: impl Into<String>,
        port: u16,
        algorithm: Algorithm,
        secret: impl Into<String>,
    ) -> ClientBuilder {
        ClientBuilder {
            host: host.into(),
            port,
            algorithm,
            secret: secret.into(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Constructs a client with default timeout and retry settings.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        algorithm: Algorithm,
        secret: impl Into<String>,
    ) -> Result<Self, Error> {
        Self::builder(host, port, algorithm, secret).build()
    }

    /// Constructs a client from an environment-derived [`Config`].
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        Self::builder(
            config.host.clone(),
            config.port,
            config.algorithm,
            config.secret.clone(),
        )
        .timeout(config.timeout)
        .max_retries(config.max_retries)
        .retry_delay(config.retry_delay)
        .build()
    }

    /// Whether the session currently holds an authenticated connection.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Opens the TCP connection and runs the nonce handshake.
    ///
    /// Idempotent if already connected. A single attempt: the retry
    /// engine lives in [`call`](Self::call).
    pub fn connect(&mut self) -> Result<(), Error> {
        if self.stream.is_some() {
            return Ok(());
        }

        debug!("connecting to {}:{}", self.host, self.port);
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        self.stream = Some(stream);
        self.serial = 1;
        self.nonce = None;

        match self.handshake() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Sends one command and returns the server's `_data` map with
    /// textual values lifted to strings.
    ///
    /// Reconnects (with a fresh handshake) and retries on transport
    /// failures, up to `max_retries` times after the initial attempt.
    /// Fatal errors tear the connection down and surface immediately.
    pub fn call(&mut self, command: &str) -> Result<Response, Error> {
        let mut attempt = 0_u32;

        loop {
            match self.call_once(command) {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "command {command:?} attempt {attempt} failed: {e}; retrying in {:?}",
                        self.retry_delay
                    );
                    self.close();
                    thread::sleep(self.retry_delay);
                }
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
    }

    /// `status` command.
    pub fn status(&mut self) -> Result<Response, Error> {
        self.call("status")
    }

    /// `reload` command.
    pub fn reload(&mut self) -> Result<Response, Error> {
        self.call("reload")
    }

    /// Sets the server's debug trace level.
    pub fn set_trace_level(&mut self, level: u32) -> Result<Response, Error> {
        self.call(&format!("trace {level}"))
    }

    /// Shuts the connection down.
    ///
    /// Best-effort and idempotent; safe to call repeatedly and called
    /// automatically on drop.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("closing connection to {}:{}", self.host, self.port);
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.nonce = None;
    }

    fn resolve(&self) -> Result<SocketAddr, Error> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::Io(
                    std::io::ErrorKind::NotFound,
                    format!("no addresses found for {}", self.host),
                )
            })
    }

    /// Runs the initial unsigned-nonce exchange on a fresh connection.
    fn handshake(&mut self) -> Result<(), Error> {
        let reply = self.exchange(Message::new(self.ctrl_section(), Map::new()))?;

        let nonce = reply
            .ctrl()?
            .get(b"_nonce".as_slice())
            .and_then(Value::as_bytes)
            .ok_or(Error::MissingNonce)?
            .to_vec();

        debug!("handshake complete with {}:{}", self.host, self.port);
        self.nonce = Some(nonce);
        self.serial = 2;

        Ok(())
    }

    fn call_once(&mut self, command: &str) -> Result<Response, Error> {
        self.connect()?;

        let mut data = Map::new();
        data.insert(b"type".to_vec(), Value::from(command));

        let reply = self.exchange(Message::new(self.ctrl_section(), data))?;
        let data = reply.data()?;

        if let Some(err) = data.get(b"err".as_slice()).and_then(Value::as_bytes) {
            if !err.is_empty() {
                return Err(Error::Server(String::from_utf8_lossy(err).into_owned()));
            }
        }

        Ok(lift_map(data))
    }

    /// Builds the `_ctrl` section for the next outbound message.
    fn ctrl_section(&self) -> Map {
        let now = unix_now();

        let mut ctrl = Map::new();
        ctrl.insert(b"_ser".to_vec(), Value::from(self.serial.to_string()));
        ctrl.insert(b"_tim".to_vec(), Value::from(now.to_string()));
        ctrl.insert(
            b"_exp".to_vec(),
            Value::from((now + MESSAGE_LIFETIME_SECS).to_string()),
        );
        if let Some(nonce) = &self.nonce {
            ctrl.insert(b"_nonce".to_vec(), Value::Bytes(nonce.clone()));
        }

        ctrl
    }

    /// Signs and sends `msg`, then reads and verifies one reply frame.
    fn exchange(&mut self, mut msg: Message) -> Result<Message, Error> {
        self.serial = self.serial.wrapping_add(1);

        let canonical = msg.serialise(SerialiseMode::Signing)?;
        msg.set_auth(auth::sign(&self.key, self.algorithm, &canonical));
        let body = msg.serialise(SerialiseMode::Full)?;

        let stream = self.stream.as_mut().ok_or_else(|| {
            Error::Io(std::io::ErrorKind::NotConnected, "not connected".to_owned())
        })?;
        write_frame(stream, &body)?;
        let reply = read_frame(stream)?;

        let reply = Message::parse(&reply)?;
        let canonical = reply.serialise(SerialiseMode::Signing)?;
        auth::verify(&self.key, self.algorithm, &canonical, reply.auth()?)?;

        Ok(reply)
    }
}

impl Drop for RndcClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn lift_map(map: &Map) -> Response {
    map.iter()
        .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), lift_value(v)))
        .collect()
}

fn lift_value(value: &Value) -> ResponseValue {
    match value {
        Value::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => ResponseValue::Text(s.to_owned()),
            Err(_) => ResponseValue::Binary(b.clone()),
        },
        Value::Map(m) => ResponseValue::Map(lift_map(m)),
        Value::List(items) => ResponseValue::List(items.iter().map(lift_value).collect()),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
