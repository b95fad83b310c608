//! Transport module - addressable multipart send/receive with polling.
//!
//! Provides:
//! - [`Transport`] - the primitive every session is written against
//! - [`ZmqSocket`] - libzmq ROUTER/DEALER/REQ sockets with reconnect and
//!   explicit context ownership ([`SharedContext`])
//! - [`MemoryTransport`] - in-process loopback driven by a [`MemoryPeer`],
//!   used to exercise sessions without a network

use std::time::Duration;

use crate::error::Result;
use crate::message::Multipart;

mod memory;
mod zmq;

pub use self::memory::{memory_pair, MemoryPeer, MemoryTransport};
pub use self::zmq::{SharedContext, ZmqSocket};

/// A socket owned by exactly one session loop.
pub trait Transport {
    /// Frame container produced and consumed by this transport.
    type Message: Multipart;

    /// Send one multipart message.
    fn send(&mut self, msg: Self::Message) -> Result<()>;

    /// Receive one multipart message. Call after `poll` reported readiness.
    fn recv(&mut self) -> Result<Self::Message>;

    /// Wait up to `timeout` for an incoming message.
    ///
    /// Returns `Ok(false)` when the timeout expired with nothing to read.
    fn poll(&mut self, timeout: Duration) -> Result<bool>;

    /// Discard the current socket and open a fresh one to the same endpoint.
    ///
    /// Anything queued on the old socket is lost.
    fn reconnect(&mut self) -> Result<()>;

    /// Close the socket and release what this transport owns.
    fn close(&mut self) -> Result<()>;
}
