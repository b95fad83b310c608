//! Worker session - serves requests for one service.
//!
//! A [`WorkerSession`] registers with the broker on connect and then hands
//! requests to the caller one at a time through [`WorkerSession::recv`],
//! which also delivers the reply to the previous request:
//!
//! ```no_run
//! use majordomo::WorkerSession;
//!
//! fn main() -> majordomo::Result<()> {
//!     let mut session = WorkerSession::connect("echo", "tcp://127.0.0.1:5555")?;
//!     let mut reply = None;
//!     while let Some(request) = session.recv(reply.take())? {
//!         reply = Some(request);
//!     }
//!     session.shutdown()
//! }
//! ```
//!
//! While waiting, the session heartbeats the broker once per interval. If
//! the broker stays silent for `heartbeat_liveness` intervals the session
//! pauses for `reconnect_interval`, opens a fresh socket and registers
//! again. A DISCONNECT from the broker triggers the same re-registration
//! without the pause.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{deadline, WorkerConfig};
use crate::error::Result;
use crate::message::Multipart;
use crate::protocol::{decode_from_broker, encode_to_broker, Command};
use crate::transport::{SharedContext, Transport, ZmqSocket};

/// Builder for a worker session on a libzmq DEALER socket.
pub struct WorkerBuilder {
    service: String,
    config: WorkerConfig,
    context: Option<zmq::Context>,
}

impl WorkerBuilder {
    /// Create a builder for `service` with default configuration.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            config: WorkerConfig::default(),
            context: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Interval between heartbeats sent to the broker.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Silent heartbeat intervals tolerated before reconnecting.
    pub fn heartbeat_liveness(mut self, liveness: usize) -> Self {
        self.config.heartbeat_liveness = liveness;
        self
    }

    /// Pause before reconnecting after the broker went silent.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.config.reconnect_interval = interval;
        self
    }

    /// Share a caller-owned context. The session never terminates it.
    pub fn context(mut self, context: &zmq::Context) -> Self {
        self.context = Some(context.clone());
        self
    }

    /// Connect to the broker at `endpoint` and register.
    pub fn connect(self, endpoint: &str) -> Result<WorkerSession<ZmqSocket>> {
        let context = match &self.context {
            Some(context) => SharedContext::borrowed(context),
            None => SharedContext::new(),
        };
        let socket = ZmqSocket::connect(context, zmq::DEALER, endpoint)?;
        WorkerSession::with_transport(socket, self.service, self.config)
    }
}

/// Worker side of the protocol.
pub struct WorkerSession<T: Transport = ZmqSocket> {
    transport: T,
    service: String,
    config: WorkerConfig,
    /// Silent intervals left before reconnecting.
    liveness: usize,
    heartbeat_at: Instant,
    /// End of the current silent interval.
    silent_until: Instant,
    /// Return address of the request being served.
    reply_to: Option<<T::Message as Multipart>::Frame>,
    closed: bool,
}

impl WorkerSession<ZmqSocket> {
    /// Start configuring a worker for `service`.
    pub fn builder(service: impl Into<String>) -> WorkerBuilder {
        WorkerBuilder::new(service)
    }

    /// Connect with default configuration and register for `service`.
    pub fn connect(service: impl Into<String>, endpoint: &str) -> Result<Self> {
        WorkerBuilder::new(service).connect(endpoint)
    }
}

impl<T: Transport> WorkerSession<T> {
    /// Register for `service` over an already connected transport.
    pub fn with_transport(
        transport: T,
        service: impl Into<String>,
        config: WorkerConfig,
    ) -> Result<Self> {
        let now = Instant::now();
        let mut session = Self {
            transport,
            service: service.into(),
            liveness: config.heartbeat_liveness,
            heartbeat_at: now,
            silent_until: now,
            config,
            reply_to: None,
            closed: false,
        };
        session.register()?;
        info!(service = %session.service, "Worker connected");
        Ok(session)
    }

    /// Service this worker serves.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Worker configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Silent intervals left before the session reconnects.
    pub fn liveness(&self) -> usize {
        self.liveness
    }

    /// Whether the caller owes a reply to the last request.
    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Deliver `reply` for the previous request, then wait for the next one.
    ///
    /// Returns `Ok(None)` without touching the socket when `reply` does not
    /// match the session state: a reply with no request outstanding, or no
    /// reply while one is owed. Returns `Err` only on fatal transport
    /// faults; other faults are logged and the wait goes on.
    pub fn recv(&mut self, reply: Option<T::Message>) -> Result<Option<T::Message>> {
        match (reply, self.reply_to.take()) {
            (Some(mut reply), Some(reply_to)) => {
                reply.wrap(reply_to);
                self.send(Command::Reply, reply)?;
            }
            (Some(_), None) => {
                warn!(service = %self.service, "Reply given with no request outstanding");
                return Ok(None);
            }
            (None, Some(reply_to)) => {
                warn!(service = %self.service, "No reply given for the outstanding request");
                self.reply_to = Some(reply_to);
                return Ok(None);
            }
            (None, None) => {}
        }

        loop {
            let wake_at = self.heartbeat_at.min(self.silent_until);
            let ready = match self
                .transport
                .poll(wake_at.saturating_duration_since(Instant::now()))
            {
                Ok(ready) => ready,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Poll failed");
                    false
                }
            };

            if ready {
                match self.transport.recv() {
                    Ok(msg) => {
                        if let Some(request) = self.process(msg)? {
                            return Ok(Some(request));
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(error = %e, "Receive failed, skipping"),
                }
            } else if Instant::now() >= self.silent_until {
                self.liveness = self.liveness.saturating_sub(1);
                if self.liveness == 0 {
                    warn!(
                        service = %self.service,
                        "Disconnected from broker, retrying"
                    );
                    std::thread::sleep(self.config.reconnect_interval);
                    self.reconnect()?;
                } else {
                    debug!(liveness = self.liveness, "Broker silent");
                    self.silent_until =
                        deadline(Instant::now(), self.config.heartbeat_interval);
                }
            }

            if Instant::now() >= self.heartbeat_at {
                self.send(Command::Heartbeat, <T::Message>::default())?;
                self.heartbeat_at = deadline(Instant::now(), self.config.heartbeat_interval);
            }
        }
    }

    /// Tell the broker this worker is leaving and close the transport.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.send(Command::Disconnect, <T::Message>::default()) {
            debug!(error = %e, "Could not send DISCONNECT");
        }
        info!(service = %self.service, "Worker shut down");
        self.transport.close()
    }

    /// Handle one message from the broker. Returns the body of a request.
    fn process(&mut self, msg: T::Message) -> Result<Option<T::Message>> {
        // Any traffic proves the broker is alive
        self.liveness = self.config.heartbeat_liveness;
        self.silent_until = deadline(Instant::now(), self.config.heartbeat_interval);

        let (command, mut body) = match decode_from_broker(msg) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Skipping invalid message");
                return Ok(None);
            }
        };

        match command {
            Command::Request => match body.unwrap_address() {
                Some(client) => {
                    debug!(client = %hex::encode_upper(&*client), "Request received");
                    self.reply_to = Some(client);
                    Ok(Some(body))
                }
                None => {
                    warn!("Skipping REQUEST without client address");
                    Ok(None)
                }
            },
            Command::Heartbeat => Ok(None),
            Command::Disconnect => {
                info!(service = %self.service, "Broker asked us to disconnect");
                self.reconnect()?;
                Ok(None)
            }
            other => {
                warn!(command = %other, "Skipping unexpected command");
                Ok(None)
            }
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        self.transport.reconnect()?;
        self.register()?;
        debug!(service = %self.service, "Worker reconnected");
        Ok(())
    }

    /// Send READY and restart the heartbeat schedule.
    fn register(&mut self) -> Result<()> {
        let payload = <T::Message>::from_frames([self.service.as_bytes()]);
        self.send(Command::Ready, payload)?;
        let now = Instant::now();
        self.liveness = self.config.heartbeat_liveness;
        self.heartbeat_at = deadline(now, self.config.heartbeat_interval);
        self.silent_until = self.heartbeat_at;
        self.reply_to = None;
        Ok(())
    }

    /// Send one command. Only fatal faults are returned; the rest are
    /// logged and the message is lost.
    fn send(&mut self, command: Command, payload: T::Message) -> Result<()> {
        match self.transport.send(encode_to_broker(command, payload)) {
            Err(e) if !e.is_fatal() => {
                warn!(error = %e, command = %command, "Send failed");
                Ok(())
            }
            result => result,
        }
    }
}
