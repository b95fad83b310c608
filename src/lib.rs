//! # majordomo
//!
//! Majordomo Protocol (MDP/0.1) service broker with worker and client
//! sessions over ZeroMQ.
//!
//! Clients send requests tagged with a service name to a central broker,
//! which queues them and hands each to a worker registered for that
//! service. The worker's reply travels back through the broker to the
//! client that asked.
//!
//! ## Architecture
//!
//! - **[`Broker`]**: one ROUTER socket, a registry of services and workers,
//!   FIFO dispatch, heartbeat sweep and the `mmi.service` discovery service
//! - **[`WorkerSession`]**: DEALER socket; READY/REQUEST/REPLY/HEARTBEAT
//!   state machine with reconnect when the broker goes silent
//! - **[`ClientSession`]**: REQ socket; bounded wait with retries on a
//!   fresh socket
//! - **[`AsyncClientSession`]**: DEALER socket; fire requests, collect replies
//!
//! Every component is a single threaded poll loop over a [`Transport`].
//!
//! ## Example
//!
//! ```no_run
//! use std::thread;
//!
//! use majordomo::message::{Multipart, RawMultipart};
//! use majordomo::{Broker, ClientSession, WorkerSession};
//!
//! fn main() -> majordomo::Result<()> {
//!     let mut broker = Broker::bind("tcp://*:5555")?;
//!     thread::spawn(move || broker.run());
//!
//!     thread::spawn(|| -> majordomo::Result<()> {
//!         let mut worker = WorkerSession::connect("echo", "tcp://127.0.0.1:5555")?;
//!         let mut reply = None;
//!         while let Some(request) = worker.recv(reply.take())? {
//!             reply = Some(request);
//!         }
//!         Ok(())
//!     });
//!
//!     let mut client = ClientSession::connect("tcp://127.0.0.1:5555")?;
//!     let reply = client.send("echo", RawMultipart::from_frames(["hello"]))?;
//!     assert!(reply.is_some());
//!     client.shutdown()
//! }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod transport;
pub mod worker;

pub use broker::{Broker, BrokerBuilder, StopHandle};
pub use client::{AsyncClientSession, ClientSession, Reply};
pub use config::{AsyncClientConfig, BrokerConfig, ClientConfig, WorkerConfig};
pub use error::{MdpError, Result};
pub use transport::Transport;
pub use worker::{WorkerBuilder, WorkerSession};
