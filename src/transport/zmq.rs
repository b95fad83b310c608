//! libzmq socket transport.
//!
//! Sockets are created with `LINGER=0` so closing one on reconnect or
//! shutdown never blocks on undelivered frames.
//!
//! # Context ownership
//!
//! A context may be shared by several sessions in one process (and must be,
//! for `inproc://` endpoints). Whoever created it tears it down:
//!
//! ```no_run
//! use majordomo::transport::SharedContext;
//!
//! let context = zmq::Context::new();
//! let borrowed = SharedContext::borrowed(&context); // never terminated by the session
//! let owned = SharedContext::new();                 // terminated on close
//! assert!(!borrowed.is_owned());
//! assert!(owned.is_owned());
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, trace};

use super::Transport;
use crate::error::{MdpError, Result};
use crate::message::{Multipart, RawMultipart};

/// A libzmq context plus who is responsible for terminating it.
pub struct SharedContext {
    context: Option<zmq::Context>,
    owned: bool,
}

impl SharedContext {
    /// Create a new context owned by the session that receives it.
    pub fn new() -> Self {
        Self {
            context: Some(zmq::Context::new()),
            owned: true,
        }
    }

    /// Use a caller-supplied context. It is never terminated by the session.
    pub fn borrowed(context: &zmq::Context) -> Self {
        Self {
            context: Some(context.clone()),
            owned: false,
        }
    }

    /// Whether closing the session terminates the context.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// The underlying context, or `None` once terminated.
    pub fn context(&self) -> Option<&zmq::Context> {
        self.context.as_ref()
    }

    fn terminate(&mut self) {
        if self.owned {
            // Dropping the last handle runs zmq_ctx_term
            self.context = None;
            debug!("Terminated ZeroMQ context");
        }
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attach {
    Bind,
    Connect,
}

/// A libzmq socket that can be re-created on the same endpoint.
pub struct ZmqSocket {
    // Declared before `context`: the socket must be dropped first or
    // terminating an owned context blocks forever.
    socket: Option<zmq::Socket>,
    context: SharedContext,
    kind: zmq::SocketType,
    endpoint: String,
    attach: Attach,
}

impl ZmqSocket {
    /// Create a socket of `kind` bound to `endpoint`.
    pub fn bind(context: SharedContext, kind: zmq::SocketType, endpoint: &str) -> Result<Self> {
        Self::open_new(context, kind, endpoint, Attach::Bind)
    }

    /// Create a socket of `kind` connected to `endpoint`.
    pub fn connect(context: SharedContext, kind: zmq::SocketType, endpoint: &str) -> Result<Self> {
        Self::open_new(context, kind, endpoint, Attach::Connect)
    }

    fn open_new(
        context: SharedContext,
        kind: zmq::SocketType,
        endpoint: &str,
        attach: Attach,
    ) -> Result<Self> {
        let mut transport = Self {
            socket: None,
            context,
            kind,
            endpoint: endpoint.to_string(),
            attach,
        };
        transport.socket = Some(transport.open()?);
        Ok(transport)
    }

    fn open(&self) -> Result<zmq::Socket> {
        let context = self.context.context().ok_or(MdpError::NotConnected)?;
        let socket = context.socket(self.kind)?;
        socket.set_linger(0)?;
        match self.attach {
            Attach::Bind => socket.bind(&self.endpoint)?,
            Attach::Connect => socket.connect(&self.endpoint)?,
        }
        debug!(endpoint = %self.endpoint, kind = ?self.kind, attach = ?self.attach, "Opened socket");
        Ok(socket)
    }

    fn socket(&self) -> Result<&zmq::Socket> {
        self.socket.as_ref().ok_or(MdpError::NotConnected)
    }

    /// Endpoint this socket binds or connects to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the socket is currently open.
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

impl Transport for ZmqSocket {
    type Message = RawMultipart;

    fn send(&mut self, msg: RawMultipart) -> Result<()> {
        trace!(frames = msg.len(), endpoint = %self.endpoint, "send");
        self.socket()?.send_multipart(msg.into_messages(), 0)?;
        Ok(())
    }

    fn recv(&mut self) -> Result<RawMultipart> {
        let socket = self.socket()?;
        let mut frames = VecDeque::new();
        loop {
            frames.push_back(socket.recv_msg(0)?);
            if !socket.get_rcvmore()? {
                break;
            }
        }
        trace!(frames = frames.len(), endpoint = %self.endpoint, "recv");
        Ok(RawMultipart::from_messages(frames))
    }

    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let ready = self.socket()?.poll(zmq::POLLIN, timeout_ms)?;
        Ok(ready > 0)
    }

    fn reconnect(&mut self) -> Result<()> {
        // Dropping the old socket closes it
        self.socket = None;
        self.socket = Some(self.open()?);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            debug!(endpoint = %self.endpoint, "Closed socket");
        }
        self.context.terminate();
        Ok(())
    }
}
