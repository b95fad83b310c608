//! Protocol module - MDP/0.1 wire constants and message codec.
//!
//! This module implements the two sub-protocols spoken with the broker:
//! - client protocol (`MDPC01`): request/reply tagged with a service name
//! - worker protocol (`MDPW01`): READY/REQUEST/REPLY/HEARTBEAT/DISCONNECT

mod frame;
mod wire_format;

pub use frame::{
    decode_async_reply, decode_broker_inbound, decode_client_reply, decode_from_broker,
    encode_client_reply, encode_client_request, encode_to_broker, encode_to_worker,
    BrokerInbound,
};
pub use wire_format::{
    decode_service, is_mmi, mmi_status, Command, Header, MDPC_CLIENT, MDPW_WORKER, MMI_PREFIX,
    MMI_SERVICE,
};
