//! In-process loopback transport.
//!
//! A [`MemoryTransport`] is handed to a session; the matching [`MemoryPeer`]
//! plays the other end: it queues inbound messages and inspects what the
//! session sent. `poll` blocks on a condition variable, so a session loop
//! driven from another thread behaves as it would on a real socket.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use majordomo::message::Multipart;
//! use majordomo::transport::{memory_pair, Transport};
//!
//! let (mut transport, peer) = memory_pair();
//! peer.deliver(["hello"]);
//!
//! assert!(transport.poll(Duration::from_millis(10)).unwrap());
//! let msg = transport.recv().unwrap();
//! transport.send(msg).unwrap();
//!
//! assert_eq!(peer.take_sent()[0].to_vecs(), vec![b"hello".to_vec()]);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::Transport;
use crate::error::{MdpError, Result};
use crate::message::{ByteMultipart, Multipart};

#[derive(Default)]
struct State {
    inbound: VecDeque<ByteMultipart>,
    outbound: VecDeque<ByteMultipart>,
    reconnects: usize,
    /// Upcoming `send`/`recv` calls that fail with `EAGAIN`.
    send_faults: usize,
    recv_faults: usize,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

/// Session side of an in-process loopback.
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// Test side of an in-process loopback.
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
}

/// Create a connected transport/peer pair.
pub fn memory_pair() -> (MemoryTransport, MemoryPeer) {
    let shared = Arc::new(Shared::default());
    (
        MemoryTransport {
            shared: shared.clone(),
        },
        MemoryPeer { shared },
    )
}

impl Transport for MemoryTransport {
    type Message = ByteMultipart;

    fn send(&mut self, msg: ByteMultipart) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(MdpError::Closed);
        }
        if state.send_faults > 0 {
            state.send_faults -= 1;
            return Err(MdpError::Zmq(zmq::Error::EAGAIN));
        }
        state.outbound.push_back(msg);
        self.shared.changed.notify_all();
        Ok(())
    }

    fn recv(&mut self) -> Result<ByteMultipart> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(MdpError::Closed);
        }
        if state.recv_faults > 0 {
            // The queued message stays for the next call
            state.recv_faults -= 1;
            return Err(MdpError::Zmq(zmq::Error::EAGAIN));
        }
        state
            .inbound
            .pop_front()
            .ok_or_else(|| MdpError::Transport("No message queued".to_string()))
    }

    fn poll(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if state.closed {
                return Err(MdpError::Closed);
            }
            if !state.inbound.is_empty() {
                return Ok(true);
            }
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(!state.inbound.is_empty());
            }
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(MdpError::Closed);
        }
        state.inbound.clear();
        state.reconnects += 1;
        self.shared.changed.notify_all();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.shared.state.lock().closed = true;
        self.shared.changed.notify_all();
        Ok(())
    }
}

impl MemoryPeer {
    /// Queue a message for the session, built from raw frames.
    pub fn deliver<I, F>(&self, frames: I)
    where
        I: IntoIterator<Item = F>,
        F: AsRef<[u8]>,
    {
        self.deliver_message(ByteMultipart::from_frames(frames));
    }

    /// Queue a message for the session.
    pub fn deliver_message(&self, msg: ByteMultipart) {
        self.shared.state.lock().inbound.push_back(msg);
        self.shared.changed.notify_all();
    }

    /// Drain everything the session has sent so far.
    pub fn take_sent(&self) -> Vec<ByteMultipart> {
        self.shared.state.lock().outbound.drain(..).collect()
    }

    /// Wait up to `timeout` for the next message the session sends.
    pub fn wait_sent(&self, timeout: Duration) -> Option<ByteMultipart> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(msg) = state.outbound.pop_front() {
                return Some(msg);
            }
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.outbound.pop_front();
            }
        }
    }

    /// Make the next `count` sends of the session fail with a non-fatal fault.
    pub fn fail_sends(&self, count: usize) {
        self.shared.state.lock().send_faults = count;
    }

    /// Make the next `count` receives of the session fail with a non-fatal fault.
    pub fn fail_recvs(&self, count: usize) {
        self.shared.state.lock().recv_faults = count;
    }

    /// Number of times the session re-created its socket.
    pub fn reconnects(&self) -> usize {
        self.shared.state.lock().reconnects
    }

    /// Whether the session closed its transport.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}
