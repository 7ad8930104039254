// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Framing of messages on the data link and the boot request format.
//!
//! A frame is one header flit followed by up to four payload flits:
//!
//! | word | contents                                  |
//! |------|-------------------------------------------|
//! | 0    | destination (packed slot address)         |
//! | 1    | 0                                         |
//! | 2    | number of additional flits, in bits 24-31 |
//! | 3    | 0                                         |
//!
//! The payload is zero-padded to a whole number of flits. Frames travelling
//! towards the host carry the sending slot in the destination word.

use std::io::{ErrorKind, Read, Write};

use mesh_engine::sim_error;
use mesh_engine::types::{SimError, SimResult};
use mesh_mapper::layout::{self, MAX_MSG_BYTES};

pub const FLIT_BYTES: usize = layout::FLIT_BYTES as usize;

pub const MAX_FLITS: usize = MAX_MSG_BYTES as usize / FLIT_BYTES;

const FLITS_SHIFT: u32 = 24;

/// Number of flits needed to carry `bytes`; never zero.
#[must_use]
pub fn num_flits(bytes: usize) -> usize {
    bytes.div_ceil(FLIT_BYTES).max(1)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub dest: u32,

    /// Always a whole number of flits.
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(dest: u32, payload: &[u8]) -> Result<Self, SimError> {
        if payload.len() > MAX_MSG_BYTES as usize {
            return sim_error!(format!(
                "{} byte message to 0x{dest:x} exceeds the {MAX_MSG_BYTES} byte limit",
                payload.len()
            ));
        }
        let mut padded = payload.to_vec();
        padded.resize(num_flits(payload.len()) * FLIT_BYTES, 0);
        Ok(Self {
            dest,
            payload: padded,
        })
    }

    #[must_use]
    pub fn num_flits(&self) -> usize {
        self.payload.len() / FLIT_BYTES
    }

    #[must_use]
    pub fn header_words(&self) -> [u32; 4] {
        [self.dest, 0, ((self.num_flits() - 1) as u32) << FLITS_SHIFT, 0]
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FLIT_BYTES + self.payload.len());
        for word in self.header_words() {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn write_to(&self, stream: &mut dyn Write) -> std::io::Result<()> {
        stream.write_all(&self.to_bytes())?;
        stream.flush()
    }

    /// Read the next frame. Returns `None` if the stream ends cleanly before
    /// a header.
    pub fn read_from(stream: &mut dyn Read) -> std::io::Result<Option<Self>> {
        let mut header = [0; FLIT_BYTES];
        match stream.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
        let word = |i: usize| {
            let mut le = [0; 4];
            le.copy_from_slice(&header[4 * i..4 * i + 4]);
            u32::from_le_bytes(le)
        };
        let flits = (word(2) >> FLITS_SHIFT) as usize + 1;
        if flits > MAX_FLITS {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("frame header announces {flits} flits"),
            ));
        }
        let mut payload = vec![0; flits * FLIT_BYTES];
        stream.read_exact(&mut payload)?;
        Ok(Some(Self {
            dest: word(0),
            payload,
        }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BootCmd {
    SetAddr = 0,
    WriteInstr = 1,
    Store = 2,
    Load = 3,
    CacheFlush = 4,
    Start = 5,
    Ping = 6,
}

impl TryFrom<u8> for BootCmd {
    type Error = SimError;

    fn try_from(value: u8) -> Result<Self, SimError> {
        Ok(match value {
            0 => Self::SetAddr,
            1 => Self::WriteInstr,
            2 => Self::Store,
            3 => Self::Load,
            4 => Self::CacheFlush,
            5 => Self::Start,
            6 => Self::Ping,
            _ => return sim_error!(format!("unknown boot command {value}")),
        })
    }
}

/// A request to the boot loader of a core.
///
/// Encoded as `{cmd u8, num_args u8, 0 u16}` followed by the arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootReq {
    pub cmd: BootCmd,
    pub args: Vec<u32>,
}

impl BootReq {
    /// Arguments that fit in one frame alongside the request word.
    pub const MAX_ARGS: usize = (MAX_FLITS * FLIT_BYTES) / 4 - 1;

    #[must_use]
    pub fn set_addr(addr: u32) -> Self {
        Self {
            cmd: BootCmd::SetAddr,
            args: vec![addr],
        }
    }

    /// Start `threads` threads of the receiving core.
    #[must_use]
    pub fn start(threads: u32) -> Self {
        Self {
            cmd: BootCmd::Start,
            args: vec![threads.saturating_sub(1)],
        }
    }

    pub fn store(words: &[u32]) -> Result<Self, SimError> {
        Self::with_args(BootCmd::Store, words)
    }

    pub fn with_args(cmd: BootCmd, args: &[u32]) -> Result<Self, SimError> {
        if args.len() > Self::MAX_ARGS {
            return sim_error!(format!(
                "{cmd:?} request with {} arguments, at most {} fit",
                args.len(),
                Self::MAX_ARGS
            ));
        }
        Ok(Self {
            cmd,
            args: args.to_vec(),
        })
    }

    #[must_use]
    pub fn num_flits(&self) -> usize {
        1 + self.args.len() / 4
    }

    /// The request as a frame payload, padded to its flits.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let mut bytes = vec![self.cmd as u8, self.args.len() as u8, 0, 0];
        for arg in &self.args {
            bytes.extend_from_slice(&arg.to_le_bytes());
        }
        bytes.resize(self.num_flits() * FLIT_BYTES, 0);
        bytes
    }

    pub fn from_payload(bytes: &[u8]) -> Result<Self, SimError> {
        if bytes.len() < 4 {
            return sim_error!("boot request shorter than its command word");
        }
        let cmd = BootCmd::try_from(bytes[0])?;
        let num_args = usize::from(bytes[1]);
        if num_args > Self::MAX_ARGS || bytes.len() < 4 + 4 * num_args {
            return sim_error!(format!(
                "{cmd:?} request claims {num_args} arguments in {} bytes",
                bytes.len()
            ));
        }
        let args = bytes[4..4 + 4 * num_args]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self { cmd, args })
    }

    pub fn to_frame(&self, dest: u32) -> Result<Frame, SimError> {
        Frame::new(dest, &self.to_payload())
    }
}

/// Requests that write `words` to memory starting at `addr`.
pub fn store_requests(addr: u32, words: &[u32]) -> Result<Vec<BootReq>, SimError> {
    let mut reqs = vec![BootReq::set_addr(addr)];
    for chunk in words.chunks(BootReq::MAX_ARGS) {
        reqs.push(BootReq::store(chunk)?);
    }
    Ok(reqs)
}

/// Requests that write instruction words to every core's instruction memory.
///
/// A new `SetAddr` is only needed where the addresses are not contiguous.
pub fn instr_requests(words: &[(u32, u32)]) -> Vec<BootReq> {
    let mut reqs = Vec::new();
    let mut next = None;
    for &(addr, word) in words {
        if next != Some(addr) {
            reqs.push(BootReq::set_addr(addr));
        }
        reqs.push(BootReq {
            cmd: BootCmd::WriteInstr,
            args: vec![word],
        });
        next = Some(addr.wrapping_add(4));
    }
    reqs
}

/// Words of a little-endian byte image, zero-padding the last one.
#[must_use]
pub fn words_of(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|c| {
            let mut le = [0; 4];
            le[..c.len()].copy_from_slice(c);
            u32::from_le_bytes(le)
        })
        .collect()
}

/// Write one boot request as a frame.
pub fn send_boot(stream: &mut dyn Write, dest: u32, req: &BootReq) -> SimResult {
    req.to_frame(dest)?
        .write_to(stream)
        .map_err(|e| SimError(format!("boot request to 0x{dest:x}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_counts_additional_flits() {
        let frame = Frame::new(0x42, &[1; 17]).unwrap();
        assert_eq!(frame.num_flits(), 2);
        assert_eq!(frame.header_words(), [0x42, 0, 1 << 24, 0]);
        assert_eq!(frame.to_bytes().len(), 3 * FLIT_BYTES);
    }

    #[test]
    fn empty_message_takes_one_flit() {
        let frame = Frame::new(0, &[]).unwrap();
        assert_eq!(frame.header_words()[2], 0);
        assert_eq!(frame.payload.len(), FLIT_BYTES);
    }

    #[test]
    fn oversized_message() {
        assert!(Frame::new(0, &[0; 65]).is_err());
    }

    #[test]
    fn store_splits_into_bursts() {
        let words: Vec<u32> = (0..40).collect();
        let reqs = store_requests(0x8000_0000, &words).unwrap();
        assert_eq!(reqs.len(), 4);
        assert_eq!(reqs[0], BootReq::set_addr(0x8000_0000));
        assert_eq!(reqs[1].args.len(), 15);
        assert_eq!(reqs[1].num_flits(), 4);
        assert_eq!(reqs[3].args, (30..40).collect::<Vec<_>>());
        assert_eq!(reqs[3].num_flits(), 3);
    }

    #[test]
    fn instructions_reset_address_on_gaps() {
        let reqs = instr_requests(&[(0, 1), (4, 2), (16, 3)]);
        let cmds: Vec<BootCmd> = reqs.iter().map(|r| r.cmd).collect();
        assert_eq!(
            cmds,
            [
                BootCmd::SetAddr,
                BootCmd::WriteInstr,
                BootCmd::WriteInstr,
                BootCmd::SetAddr,
                BootCmd::WriteInstr
            ]
        );
        assert_eq!(reqs[3].args, [16]);
    }

    #[test]
    fn start_counts_from_zero() {
        assert_eq!(BootReq::start(16).args, [15]);
        let payload = BootReq::start(16).to_payload();
        assert_eq!(&payload[..8], &[5, 1, 0, 0, 15, 0, 0, 0]);
        assert_eq!(BootReq::from_payload(&payload).unwrap(), BootReq::start(16));
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            BootReq::from_payload(&[9, 0, 0, 0]).unwrap_err().to_string(),
            "Error: unknown boot command 9"
        );
    }
}
