//! Client sessions - send requests to a service through the broker.
//!
//! Two flavours:
//! - [`ClientSession`] - one request at a time on a REQ socket; waits up to
//!   `timeout` per attempt and retries on a fresh socket up to `retries` times
//! - [`AsyncClientSession`] - DEALER socket; `send` returns immediately and
//!   replies are collected with `recv`
//!
//! # Example
//!
//! ```no_run
//! use majordomo::message::{Multipart, RawMultipart};
//! use majordomo::ClientSession;
//!
//! fn main() -> majordomo::Result<()> {
//!     let mut session = ClientSession::connect("tcp://127.0.0.1:5555")?;
//!     match session.send("echo", RawMultipart::from_frames(["hello"]))? {
//!         Some(reply) => println!("{:?}", reply),
//!         None => println!("no reply"),
//!     }
//!     session.shutdown()
//! }
//! ```
//!
//! The async client does not correlate replies with requests beyond the
//! service name carried in each [`Reply`]. With several requests in flight
//! to the same service, replies arrive in the order workers finish them,
//! which need not be the order they were sent.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{AsyncClientConfig, ClientConfig};
use crate::error::Result;
use crate::message::Multipart;
use crate::protocol::{decode_async_reply, decode_client_reply, encode_client_request};
use crate::transport::{SharedContext, Transport, ZmqSocket};

fn shared_context(context: &Option<zmq::Context>) -> SharedContext {
    match context {
        Some(context) => SharedContext::borrowed(context),
        None => SharedContext::new(),
    }
}

/// Builder for a synchronous client on a libzmq REQ socket.
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    context: Option<zmq::Context>,
}

impl ClientBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Time to wait for a reply on each attempt.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Number of attempts before giving up.
    pub fn retries(mut self, retries: usize) -> Self {
        self.config.retries = retries;
        self
    }

    /// Share a caller-owned context. The session never terminates it.
    pub fn context(mut self, context: &zmq::Context) -> Self {
        self.context = Some(context.clone());
        self
    }

    /// Connect to the broker at `endpoint`.
    pub fn connect(self, endpoint: &str) -> Result<ClientSession<ZmqSocket>> {
        let socket = ZmqSocket::connect(shared_context(&self.context), zmq::REQ, endpoint)?;
        Ok(ClientSession::with_transport(socket, self.config))
    }
}

/// Synchronous request/reply client with bounded retries.
pub struct ClientSession<T: Transport = ZmqSocket> {
    transport: T,
    config: ClientConfig,
    closed: bool,
}

impl ClientSession<ZmqSocket> {
    /// Start configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect with default configuration and a context of its own.
    pub fn connect(endpoint: &str) -> Result<Self> {
        ClientBuilder::new().connect(endpoint)
    }
}

impl<T: Transport> ClientSession<T> {
    /// Create a client over an already connected transport.
    ///
    /// The transport must enforce request/reply alternation the way a REQ
    /// socket does; `reconnect` is what resets it after a lost reply.
    pub fn with_transport(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            closed: false,
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `request` to `service` and wait for the reply body.
    ///
    /// Each attempt waits up to `timeout`; an attempt without a reply
    /// re-creates the socket and counts against `retries`. Returns
    /// `Ok(None)` once retries are exhausted, or straight away when the
    /// reply is malformed or names a different service. Transport faults
    /// are returned as `Err`: the request may or may not have been
    /// delivered.
    pub fn send(&mut self, service: &str, request: T::Message) -> Result<Option<T::Message>> {
        let request = encode_client_request(service, request);
        let mut retries_left = self.config.retries;

        while retries_left > 0 {
            self.transport.send(request.duplicate())?;

            if self.transport.poll(self.config.timeout)? {
                let reply = self.transport.recv()?;
                return match decode_client_reply(reply, service) {
                    Ok(body) => Ok(Some(body)),
                    Err(e) => {
                        warn!(service, error = %e, "Discarding reply");
                        Ok(None)
                    }
                };
            }

            retries_left -= 1;
            warn!(service, retries_left, "No reply, reconnecting");
            self.transport.reconnect()?;
        }

        warn!(service, "Giving up after {} attempts", self.config.retries);
        Ok(None)
    }

    /// Close the transport. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!("Client shut down");
        self.transport.close()
    }
}

/// A reply received by an [`AsyncClientSession`].
#[derive(Debug)]
pub struct Reply<M> {
    /// Service that answered.
    pub service: String,
    /// Reply body frames.
    pub body: M,
}

/// Builder for an asynchronous client on a libzmq DEALER socket.
#[derive(Default)]
pub struct AsyncClientBuilder {
    config: AsyncClientConfig,
    context: Option<zmq::Context>,
}

impl AsyncClientBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: AsyncClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Time `recv` waits for a reply.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Share a caller-owned context. The session never terminates it.
    pub fn context(mut self, context: &zmq::Context) -> Self {
        self.context = Some(context.clone());
        self
    }

    /// Connect to the broker at `endpoint`.
    pub fn connect(self, endpoint: &str) -> Result<AsyncClientSession<ZmqSocket>> {
        let socket = ZmqSocket::connect(shared_context(&self.context), zmq::DEALER, endpoint)?;
        Ok(AsyncClientSession::with_transport(socket, self.config))
    }
}

/// Client that can have several requests in flight.
pub struct AsyncClientSession<T: Transport = ZmqSocket> {
    transport: T,
    config: AsyncClientConfig,
    closed: bool,
}

impl AsyncClientSession<ZmqSocket> {
    /// Start configuring an async client.
    pub fn builder() -> AsyncClientBuilder {
        AsyncClientBuilder::new()
    }

    /// Connect with default configuration and a context of its own.
    pub fn connect(endpoint: &str) -> Result<Self> {
        AsyncClientBuilder::new().connect(endpoint)
    }
}

impl<T: Transport> AsyncClientSession<T> {
    /// Create a client over an already connected transport.
    pub fn with_transport(transport: T, config: AsyncClientConfig) -> Self {
        Self {
            transport,
            config,
            closed: false,
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &AsyncClientConfig {
        &self.config
    }

    /// Queue `request` for `service` without waiting for the reply.
    pub fn send(&mut self, service: &str, request: T::Message) -> Result<()> {
        let mut msg = encode_client_request(service, request);
        msg.push_front_bytes(b"");
        self.transport.send(msg)
    }

    /// Wait up to `timeout` for the next reply.
    ///
    /// Returns `Ok(None)` on timeout or when the reply is malformed.
    pub fn recv(&mut self) -> Result<Option<Reply<T::Message>>> {
        if !self.transport.poll(self.config.timeout)? {
            return Ok(None);
        }
        match decode_async_reply(self.transport.recv()?) {
            Ok((service, body)) => Ok(Some(Reply { service, body })),
            Err(e) => {
                warn!(error = %e, "Discarding reply");
                Ok(None)
            }
        }
    }

    /// Close the transport. Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close()
    }
}
