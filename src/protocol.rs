//! The logical call events carried inside frame payloads, and their wire
//! encoding.
//!
//! A frame payload is a `bincode`-serialized [`WireMessage`]. This module
//! only does the encode/decode; dispatching the decoded message into
//! table enrollment, handler invocation, etc. lives in
//! [`crate::connection`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CallId = u32;

#[derive(Debug, Serialize, Deserialize)]
pub enum WireMessage {
    InitRequest(InitPayload),
    InitResponse(InitPayload),
    CallRequest {
        id: CallId,
        ttl_millis: u64,
        arg1: Vec<u8>,
        arg2: Vec<u8>,
        arg3: Vec<u8>,
    },
    CallResponse {
        id: CallId,
        ok: bool,
        arg2: Vec<u8>,
        arg3: Vec<u8>,
    },
    CallError {
        original_id: CallId,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPayload {
    /// The advertised `host:port` of the sender, or `0.0.0.0:0` if the
    /// sender has no routable address (dial-only peer).
    pub host_port: String,
    pub process_name: String,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame payload: {0}")]
    Decode(#[from] bincode::Error),
    #[error("call frame received before init handshake completed")]
    CallBeforeInit,
    #[error("unexpected second init message")]
    DuplicateInit,
}

pub fn encode(msg: &WireMessage) -> Vec<u8> {
    // Construction from known, finite-size fields; only an allocator
    // failure could make this fail, which `bincode` cannot report here.
    bincode::serialize(msg).expect("WireMessage is always serializable")
}

pub fn decode(payload: &[u8]) -> Result<WireMessage, ProtocolError> {
    Ok(bincode::deserialize(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_request_round_trips() {
        let msg = WireMessage::CallRequest {
            id: 42,
            ttl_millis: 2000,
            arg1: b"echo".to_vec(),
            arg2: b"k".to_vec(),
            arg3: b"v".to_vec(),
        };
        let bytes = encode(&msg);
        match decode(&bytes).unwrap() {
            WireMessage::CallRequest { id, arg1, arg2, arg3, .. } => {
                assert_eq!(id, 42);
                assert_eq!(arg1, b"echo");
                assert_eq!(arg2, b"k");
                assert_eq!(arg3, b"v");
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let err = decode(&[0xff, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }
}
