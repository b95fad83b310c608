//! Encoding and decoding of MDP messages.
//!
//! Pure functions over [`Multipart`] values; no I/O. Decoders consume the
//! message and hand back the remaining frames, so a body is never copied
//! on its way through the broker.
//!
//! # Example
//!
//! ```
//! use majordomo::message::{ByteMultipart, Multipart};
//! use majordomo::protocol::{decode_client_reply, encode_client_request};
//!
//! let request = encode_client_request("echo", ByteMultipart::from_frames(["hi"]));
//! assert_eq!(request.to_vecs(), vec![b"MDPC01".to_vec(), b"echo".to_vec(), b"hi".to_vec()]);
//!
//! // The broker answers with the same header and service name
//! let body = decode_client_reply(request, "echo").unwrap();
//! assert_eq!(body.to_vecs(), vec![b"hi".to_vec()]);
//! ```

use crate::error::{MdpError, Result};
use crate::message::Multipart;

use super::wire_format::{decode_service, Command, Header, MDPC_CLIENT, MDPW_WORKER};

/// A message read from the broker's socket, routing frames split off.
pub enum BrokerInbound<M: Multipart> {
    /// Request from a client.
    Client {
        /// Return address of the client.
        sender: M::Frame,
        /// Requested service.
        service: String,
        /// Request body frames.
        body: M,
    },
    /// Command from a worker.
    Worker {
        /// Return address of the worker.
        sender: M::Frame,
        /// Worker command.
        command: Command,
        /// Command payload frames.
        body: M,
    },
}

/// Split a message received on the broker's ROUTER socket.
///
/// Expects `[sender, "", header, ...]`. Client requests need a service and
/// at least one body frame; worker messages need a command frame.
pub fn decode_broker_inbound<M: Multipart>(mut msg: M) -> Result<BrokerInbound<M>> {
    if msg.len() < 3 {
        return Err(MdpError::Protocol(format!(
            "Message too short ({} frames)",
            msg.len()
        )));
    }
    let sender = msg.pop_front().ok_or_else(|| MdpError::protocol("Missing sender"))?;
    if !msg.pop_front().is_some_and(|f| f.is_empty()) {
        return Err(MdpError::protocol("Missing envelope delimiter"));
    }
    let header = msg.pop_front().ok_or_else(|| MdpError::protocol("Missing header"))?;

    match Header::decode(&header)? {
        Header::Client => {
            if msg.len() < 2 {
                return Err(MdpError::protocol("Client request needs service and body"));
            }
            let service = msg
                .pop_front()
                .ok_or_else(|| MdpError::protocol("Missing service"))?;
            let service = decode_service(&service)?;
            Ok(BrokerInbound::Client {
                sender,
                service,
                body: msg,
            })
        }
        Header::Worker => {
            let command = msg
                .pop_front()
                .ok_or_else(|| MdpError::protocol("Missing command"))?;
            let command = Command::decode(&command)?;
            Ok(BrokerInbound::Worker {
                sender,
                command,
                body: msg,
            })
        }
    }
}

/// Build the frames a client sends: `["MDPC01", service, body...]`.
///
/// A REQ socket adds the envelope delimiter itself.
pub fn encode_client_request<M: Multipart>(service: &str, mut body: M) -> M {
    body.push_front_bytes(service.as_bytes());
    body.push_front_bytes(MDPC_CLIENT);
    body
}

/// Build the broker's answer to a client:
/// `[client, "", "MDPC01", service, body...]`.
pub fn encode_client_reply<M: Multipart>(client: M::Frame, service: &str, mut body: M) -> M {
    body.push_front_bytes(service.as_bytes());
    body.push_front_bytes(MDPC_CLIENT);
    body.wrap(client);
    body
}

/// Validate a reply received on a REQ socket and return its body.
///
/// Expects `["MDPC01", service, body...]` with `service` equal to the one
/// the request was sent to.
pub fn decode_client_reply<M: Multipart>(mut msg: M, service: &str) -> Result<M> {
    if msg.len() < 3 {
        return Err(MdpError::Protocol(format!(
            "Invalid reply ({} frames, need at least 3)",
            msg.len()
        )));
    }
    let header = msg.pop_front().ok_or_else(|| MdpError::protocol("Missing header"))?;
    if &header[..] != MDPC_CLIENT {
        return Err(MdpError::protocol("Reply header is not MDPC01"));
    }
    let reply_service = msg
        .pop_front()
        .ok_or_else(|| MdpError::protocol("Missing service"))?;
    if &reply_service[..] != service.as_bytes() {
        return Err(MdpError::Protocol(format!(
            "Reply from service {} but request went to {}",
            String::from_utf8_lossy(&reply_service),
            service
        )));
    }
    Ok(msg)
}

/// Validate a reply received on a DEALER socket: `["", "MDPC01", service, body...]`.
///
/// Returns the replying service and the body.
pub fn decode_async_reply<M: Multipart>(mut msg: M) -> Result<(String, M)> {
    if msg.len() < 4 {
        return Err(MdpError::Protocol(format!(
            "Invalid reply ({} frames, need at least 4)",
            msg.len()
        )));
    }
    if !msg.pop_front().is_some_and(|f| f.is_empty()) {
        return Err(MdpError::protocol("Missing envelope delimiter"));
    }
    let header = msg.pop_front().ok_or_else(|| MdpError::protocol("Missing header"))?;
    if &header[..] != MDPC_CLIENT {
        return Err(MdpError::protocol("Reply header is not MDPC01"));
    }
    let service = msg
        .pop_front()
        .ok_or_else(|| MdpError::protocol("Missing service"))?;
    Ok((decode_service(&service)?, msg))
}

/// Build a command from the broker to a worker:
/// `[worker, "", "MDPW01", command, payload...]`.
pub fn encode_to_worker<M: Multipart>(worker: M::Frame, command: Command, mut payload: M) -> M {
    payload.push_front_bytes(&[command.as_byte()]);
    payload.push_front_bytes(MDPW_WORKER);
    payload.wrap(worker);
    payload
}

/// Build a command from a worker to the broker: `["", "MDPW01", command, payload...]`.
pub fn encode_to_broker<M: Multipart>(command: Command, mut payload: M) -> M {
    payload.push_front_bytes(&[command.as_byte()]);
    payload.push_front_bytes(MDPW_WORKER);
    payload.push_front_bytes(b"");
    payload
}

/// Split a command received on a worker's DEALER socket.
///
/// Expects `["", "MDPW01", command, payload...]`.
pub fn decode_from_broker<M: Multipart>(mut msg: M) -> Result<(Command, M)> {
    if msg.len() < 3 {
        return Err(MdpError::Protocol(format!(
            "Message too short ({} frames)",
            msg.len()
        )));
    }
    if !msg.pop_front().is_some_and(|f| f.is_empty()) {
        return Err(MdpError::protocol("Missing envelope delimiter"));
    }
    let header = msg.pop_front().ok_or_else(|| MdpError::protocol("Missing header"))?;
    if Header::decode(&header)? != Header::Worker {
        return Err(MdpError::protocol("Header is not MDPW01"));
    }
    let command = msg
        .pop_front()
        .ok_or_else(|| MdpError::protocol("Missing command"))?;
    Ok((Command::decode(&command)?, msg))
}
