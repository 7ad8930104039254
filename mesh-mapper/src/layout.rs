// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Fixed-layout records of a slot heap image.
//!
//! Every record is a sequence of little-endian `u32` words. Pointers stored in
//! records are absolute addresses in the slot's address space, that is the
//! heap base plus the offset within the image.

use mesh_config::settings::Discipline;
use mesh_engine::sim_error;
use mesh_engine::types::SimError;

pub const LOG_LINE_BYTES: u32 = 5;

/// Every region of an image starts on a line boundary.
pub const LINE_BYTES: u32 = 1 << LOG_LINE_BYTES;

pub const LOG_MAX_MSG_BYTES: u32 = 6;
pub const MAX_MSG_BYTES: u32 = 1 << LOG_MAX_MSG_BYTES;

pub const LOG_FLIT_BYTES: u32 = 4;
pub const FLIT_BYTES: u32 = 1 << LOG_FLIT_BYTES;

/// Size of the header carried by every device message.
pub const MSG_HEADER_BYTES: u32 = 16;
pub const MAX_PAYLOAD_BYTES: u32 = MAX_MSG_BYTES - MSG_HEADER_BYTES;

/// Top of each partition kept free for the slot's stack.
pub const STACK_BYTES: u32 = 65536;

/// Devices per slot and incoming edges per slot are indexed with 16 bits.
pub const MAX_SLOT_ENTRIES: usize = u16::MAX as usize;

/// Pin table entry used by sync edges. Application pin `p` uses entry `p + 1`.
pub const SYNC_ENTRY: u32 = 0;

#[must_use]
pub fn align_line(offset: u32) -> u32 {
    (offset + LINE_BYTES - 1) & !(LINE_BYTES - 1)
}

pub(crate) fn put_words(bytes: &mut [u8], offset: usize, words: &[u32]) {
    for (i, word) in words.iter().enumerate() {
        let at = offset + 4 * i;
        bytes[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }
}

pub(crate) fn get_words<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u32; N], SimError> {
    if offset + 4 * N > bytes.len() {
        return sim_error!(format!(
            "record of {N} words at offset {offset} overruns image of {} bytes",
            bytes.len()
        ));
    }
    let mut words = [0; N];
    for (i, word) in words.iter_mut().enumerate() {
        let at = offset + 4 * i;
        let mut le = [0; 4];
        le.copy_from_slice(&bytes[at..at + 4]);
        *word = u32::from_le_bytes(le);
    }
    Ok(words)
}

/// First line of every image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageHeader {
    pub num_devices: u32,
    pub state_size: u32,
    pub edge_size: u32,
    pub devices_ptr: u32,
    pub in_edges_ptr: u32,
    pub num_in_edges: u32,
    pub discipline: Discipline,

    /// Pin table entries per device, including the sync entry.
    pub table_pins: u32,

    /// Payload bytes of every device message.
    pub message_bytes: u32,
}

impl ImageHeader {
    pub const WORDS: usize = 8;

    #[must_use]
    pub fn to_words(&self) -> [u32; Self::WORDS] {
        let discipline = match self.discipline {
            Discipline::Async => 0,
            Discipline::Sync => 1,
        };
        [
            self.num_devices,
            self.state_size,
            self.edge_size,
            self.devices_ptr,
            self.in_edges_ptr,
            self.num_in_edges,
            (discipline << 16) | self.table_pins,
            self.message_bytes,
        ]
    }

    pub fn from_words(words: [u32; Self::WORDS]) -> Result<Self, SimError> {
        let discipline = match words[6] >> 16 {
            0 => Discipline::Async,
            1 => Discipline::Sync,
            other => return sim_error!(format!("unknown discipline {other} in image header")),
        };
        Ok(Self {
            num_devices: words[0],
            state_size: words[1],
            edge_size: words[2],
            devices_ptr: words[3],
            in_edges_ptr: words[4],
            num_in_edges: words[5],
            discipline,
            table_pins: words[6] & 0xffff,
            message_bytes: words[7],
        })
    }
}

/// One per device, in slot-local order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceRecord {
    pub global_id: u32,
    pub state_ptr: u32,
    pub pins_ptr: u32,
    pub table_pins: u32,

    /// Incoming edges, sync edges included.
    pub num_in: u32,

    /// Outgoing application edges.
    pub fan_out: u32,

    /// Space for messages that arrive one step early (synchronized only).
    pub next_buf_ptr: u32,
}

impl DeviceRecord {
    pub const WORDS: usize = 8;

    #[must_use]
    pub fn to_words(&self) -> [u32; Self::WORDS] {
        [
            self.global_id,
            self.state_ptr,
            self.pins_ptr,
            self.table_pins,
            self.num_in,
            self.fan_out,
            self.next_buf_ptr,
            0,
        ]
    }

    #[must_use]
    pub fn from_words(words: [u32; Self::WORDS]) -> Self {
        Self {
            global_id: words[0],
            state_ptr: words[1],
            pins_ptr: words[2],
            table_pins: words[3],
            num_in: words[4],
            fan_out: words[5],
            next_buf_ptr: words[6],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PinEntry {
    pub neighbours_ptr: u32,
    pub count: u32,

    /// Key of the programmable router records for this pin, 0 if none.
    pub route_key: u32,
}

impl PinEntry {
    pub const WORDS: usize = 4;

    #[must_use]
    pub fn to_words(&self) -> [u32; Self::WORDS] {
        [self.neighbours_ptr, self.count, self.route_key, 0]
    }

    #[must_use]
    pub fn from_words(words: [u32; Self::WORDS]) -> Self {
        Self {
            neighbours_ptr: words[0],
            count: words[1],
            route_key: words[2],
        }
    }
}

/// A resolved destination of an outgoing edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Neighbour {
    /// Packed slot address.
    pub slot: u32,
    pub local: u16,

    /// Index into the destination slot's incoming edge table.
    pub key: u16,
}

impl Neighbour {
    pub const WORDS: usize = 2;

    #[must_use]
    pub fn to_words(&self) -> [u32; Self::WORDS] {
        [self.slot, u32::from(self.local) | (u32::from(self.key) << 16)]
    }

    #[must_use]
    pub fn from_words(words: [u32; Self::WORDS]) -> Self {
        Self {
            slot: words[0],
            local: (words[1] & 0xffff) as u16,
            key: (words[1] >> 16) as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        assert_eq!(align_line(0), 0);
        assert_eq!(align_line(1), 32);
        assert_eq!(align_line(32), 32);
        assert_eq!(align_line(33), 64);
    }

    #[test]
    fn header_discipline_field() {
        let header = ImageHeader {
            num_devices: 3,
            state_size: 8,
            edge_size: 0,
            devices_ptr: 0x8000_0020,
            in_edges_ptr: 0x8000_0100,
            num_in_edges: 2,
            discipline: Discipline::Sync,
            table_pins: 3,
            message_bytes: 4,
        };
        let words = header.to_words();
        assert_eq!(words[6], 0x0001_0003);
        assert_eq!(ImageHeader::from_words(words).unwrap(), header);

        let mut bad = words;
        bad[6] = 0x0002_0003;
        assert!(ImageHeader::from_words(bad).is_err());
    }

    #[test]
    fn words_are_little_endian() {
        let mut bytes = vec![0; 8];
        put_words(&mut bytes, 0, &[0x0403_0201, 0x0807_0605]);
        assert_eq!(bytes, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(get_words::<2>(&bytes, 0).unwrap(), [0x0403_0201, 0x0807_0605]);
        assert!(get_words::<2>(&bytes, 4).is_err());
    }
}
