// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Device messages as they travel between slots and the host.
//!
//! Every message is a [`MsgHeader`] followed by the payload, a `bincode`
//! encoding of the device's message type. The payload size is fixed for a
//! given message type and is recorded in each heap image.

use mesh_engine::sim_error;
use mesh_engine::types::SimError;
use mesh_mapper::layout::{MAX_PAYLOAD_BYTES, MSG_HEADER_BYTES};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Carries no payload for the receiver, only counts towards its step.
pub const FLAG_SYNC: u32 = 1;

/// Sent by or to the host rather than along an edge.
pub const FLAG_HOST: u32 = 2;

/// Edge key of messages that did not arrive along an edge.
pub const NO_EDGE: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MsgHeader {
    /// Slot-local destination device, or the global sender for host-bound
    /// messages.
    pub device: u32,

    /// Key into the destination slot's incoming edge table.
    pub edge: u32,

    /// Time step of the sender (synchronized discipline only).
    pub stamp: u32,

    pub flags: u32,
}

impl MsgHeader {
    pub const BYTES: usize = MSG_HEADER_BYTES as usize;

    #[must_use]
    pub fn is_sync(&self) -> bool {
        self.flags & FLAG_SYNC != 0
    }

    #[must_use]
    pub fn is_host(&self) -> bool {
        self.flags & FLAG_HOST != 0
    }

    /// Header followed by `payload`.
    #[must_use]
    pub fn frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::BYTES + payload.len());
        for word in [self.device, self.edge, self.stamp, self.flags] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Split a message into its header and payload.
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8]), SimError> {
        if bytes.len() < Self::BYTES {
            return sim_error!(format!(
                "message of {} bytes is shorter than its header",
                bytes.len()
            ));
        }
        let word = |i: usize| {
            let mut le = [0; 4];
            le.copy_from_slice(&bytes[4 * i..4 * i + 4]);
            u32::from_le_bytes(le)
        };
        let header = Self {
            device: word(0),
            edge: word(1),
            stamp: word(2),
            flags: word(3),
        };
        Ok((header, &bytes[Self::BYTES..]))
    }
}

pub fn encode_payload<M: Serialize>(msg: &M) -> Result<Vec<u8>, SimError> {
    bincode::serialize(msg).map_err(|e| SimError(format!("cannot encode message: {e}")))
}

pub fn decode_payload<M: DeserializeOwned>(bytes: &[u8]) -> Result<M, SimError> {
    bincode::deserialize(bytes).map_err(|e| SimError(format!("cannot decode message: {e}")))
}

/// Payload bytes used by every message of type `M`.
pub fn payload_bytes<M: Serialize + Default>() -> Result<u32, SimError> {
    let size = encode_payload(&M::default())?.len() as u32;
    if size > MAX_PAYLOAD_BYTES {
        return sim_error!(format!(
            "messages of {size} bytes exceed the {MAX_PAYLOAD_BYTES} byte payload"
        ));
    }
    Ok(size)
}
