// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Per-board control packets and the byte protocol tunnelled through them.
//!
//! A [`ControlPacket`] is always [`ControlPacket::BYTES`] long on the wire:
//! link id, channel, payload length and four payload bytes. Packets on the
//! [`Channel::Uart`] channel carry one [`DebugCmd`] towards a board or one
//! [`DebugReply`] back from it.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};

use mesh_engine::sim_error;
use mesh_engine::types::SimError;

/// Core number that makes a `SetDest` apply to every core of the board.
pub const BROADCAST_CORE: u8 = 0x80;

pub const MAX_PAYLOAD: usize = 4;

/// Longest line assembled from `StdOut` bytes before it is flushed.
pub const MAX_LINE_BYTES: usize = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    Ctrl = 0,
    Uart = 1,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlPacket {
    pub link_id: u8,
    pub channel: Channel,
    pub payload: Vec<u8>,
}

impl ControlPacket {
    pub const BYTES: usize = 3 + MAX_PAYLOAD;

    pub fn uart(link_id: u8, cmd: &DebugCmd) -> Self {
        Self {
            link_id,
            channel: Channel::Uart,
            payload: cmd.to_bytes(),
        }
    }

    pub fn to_bytes(&self) -> Result<[u8; Self::BYTES], SimError> {
        if self.payload.len() > MAX_PAYLOAD {
            return sim_error!(format!(
                "control packet for link {} carries {} bytes",
                self.link_id,
                self.payload.len()
            ));
        }
        let mut bytes = [0; Self::BYTES];
        bytes[0] = self.link_id;
        bytes[1] = self.channel as u8;
        bytes[2] = self.payload.len() as u8;
        bytes[3..3 + self.payload.len()].copy_from_slice(&self.payload);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8; Self::BYTES]) -> Result<Self, SimError> {
        let channel = match bytes[1] {
            0 => Channel::Ctrl,
            1 => Channel::Uart,
            other => return sim_error!(format!("unknown control channel {other}")),
        };
        let len = usize::from(bytes[2]);
        if len > MAX_PAYLOAD {
            return sim_error!(format!("control packet claims {len} payload bytes"));
        }
        Ok(Self {
            link_id: bytes[0],
            channel,
            payload: bytes[3..3 + len].to_vec(),
        })
    }

    pub fn write_to(&self, stream: &mut dyn Write) -> Result<(), SimError> {
        let bytes = self.to_bytes()?;
        stream
            .write_all(&bytes)
            .and_then(|()| stream.flush())
            .map_err(|e| SimError(format!("control link {}: {e}", self.link_id)))
    }

    /// Read the next packet, or `None` once the stream has ended.
    pub fn read_from(stream: &mut dyn Read) -> Result<Option<Self>, SimError> {
        let mut bytes = [0; Self::BYTES];
        match stream.read_exact(&mut bytes) {
            Ok(()) => Self::from_bytes(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => sim_error!(format!("control link: {e}")),
        }
    }
}

const QUERY: u8 = 0;
const SET_DEST: u8 = 1;
const STD_IO: u8 = 2;
const TEMP: u8 = 3;
const ENABLE_IDLE: u8 = 4;
const READY: u8 = 255;

/// Host to board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugCmd {
    QueryIn,

    /// Direct following `StdIn` bytes at a thread of a core, or of every core
    /// with [`BROADCAST_CORE`].
    SetDest { thread: u8, core: u8 },
    StdIn(u8),
    TempIn,
    EnableIdle(bool),
}

impl DebugCmd {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::QueryIn => vec![QUERY, 0],
            Self::SetDest { thread, core } => vec![SET_DEST, thread, core],
            Self::StdIn(byte) => vec![STD_IO, byte],
            Self::TempIn => vec![TEMP],
            Self::EnableIdle(enable) => vec![ENABLE_IDLE, u8::from(enable)],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SimError> {
        Ok(match bytes {
            [QUERY, _] => Self::QueryIn,
            [SET_DEST, thread, core] => Self::SetDest {
                thread: *thread,
                core: *core,
            },
            [STD_IO, byte] => Self::StdIn(*byte),
            [TEMP] => Self::TempIn,
            [ENABLE_IDLE, enable] => Self::EnableIdle(*enable != 0),
            _ => return sim_error!(format!("malformed debug command {bytes:?}")),
        })
    }
}

/// Board to host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugReply {
    QueryOut(u8),
    StdOut { thread: u8, core: u8, byte: u8 },
    TempOut(u8),
    Ready,
}

impl DebugReply {
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            Self::QueryOut(board) => vec![QUERY, board],
            Self::StdOut { thread, core, byte } => vec![STD_IO, thread, core, byte],
            Self::TempOut(temp) => vec![TEMP, temp],
            Self::Ready => vec![READY],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SimError> {
        Ok(match bytes {
            [QUERY, board] => Self::QueryOut(*board),
            [STD_IO, thread, core, byte] => Self::StdOut {
                thread: *thread,
                core: *core,
                byte: *byte,
            },
            [TEMP, temp] => Self::TempOut(*temp),
            [READY] => Self::Ready,
            _ => return sim_error!(format!("malformed debug reply {bytes:?}")),
        })
    }
}

/// Turns per-thread `StdOut` bytes into lines.
#[derive(Default)]
pub struct LineAssembler {
    partial: HashMap<u32, Vec<u8>>,
}

impl LineAssembler {
    /// Add a byte printed by `thread_id`. Returns the line it completes, if
    /// any, without its newline.
    pub fn push(&mut self, thread_id: u32, byte: u8) -> Option<String> {
        let line = self.partial.entry(thread_id).or_default();
        if byte != b'\n' {
            line.push(byte);
            if line.len() < MAX_LINE_BYTES {
                return None;
            }
        }
        let line = std::mem::take(line);
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Lines left unfinished, in thread order.
    pub fn flush(&mut self) -> Vec<(u32, String)> {
        let mut left: Vec<(u32, String)> = self
            .partial
            .drain()
            .filter(|(_, bytes)| !bytes.is_empty())
            .map(|(thread, bytes)| (thread, String::from_utf8_lossy(&bytes).into_owned()))
            .collect();
        left.sort();
        left
    }
}
