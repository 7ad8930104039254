// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Hierarchical slot addresses.
//!
//! A slot is one hardware thread. Its address packs, from the most
//! significant bits down: board Y, board X, mailbox Y, mailbox X, core and
//! thread. The field widths are fixed so that any address fits in 16 bits.

use std::fmt;

use mesh_config::settings::{
    BOARD_BITS, CORE_BITS, CORES_PER_DRAM, LOG_BYTES_PER_DRAM, MAILBOX_BITS, MeshDims, THREAD_BITS,
};
use mesh_engine::sim_error;
use mesh_engine::types::SimError;

/// Total number of bits used by a packed slot address.
pub const ADDRESS_BITS: u32 = 2 * BOARD_BITS + 2 * MAILBOX_BITS + CORE_BITS + THREAD_BITS;

/// Bits of a core index within a board (mailbox Y, mailbox X and core).
pub const CORE_IN_BOARD_BITS: u32 = 2 * MAILBOX_BITS + CORE_BITS;

/// Threads sharing one DRAM.
pub const THREADS_PER_DRAM: u32 = CORES_PER_DRAM << THREAD_BITS;

/// Shift from a slot address to its core, mailbox (cache) and board.
pub const CORE_SHIFT: u32 = THREAD_BITS;
pub const MAILBOX_SHIFT: u32 = THREAD_BITS + CORE_BITS;
pub const BOARD_SHIFT: u32 = MAILBOX_SHIFT + 2 * MAILBOX_BITS;

/// The fields are declared from most to least significant so that the derived
/// ordering matches the packed value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotAddress {
    pub board_y: u32,
    pub board_x: u32,
    pub mailbox_y: u32,
    pub mailbox_x: u32,
    pub core: u32,
    pub thread: u32,
}

fn field(name: &str, value: u32, bits: u32) -> Result<u32, SimError> {
    if value >> bits != 0 {
        return sim_error!(format!(
            "slot address {name} {value} does not fit in {bits} bits"
        ));
    }
    Ok(value)
}

impl SlotAddress {
    /// Build an address from a board position, a core index within the board
    /// and a thread.
    pub fn from_core(board_x: u32, board_y: u32, core_in_board: u32, thread: u32) -> Self {
        let mailbox_mask = (1 << MAILBOX_BITS) - 1;
        Self {
            board_y,
            board_x,
            mailbox_y: (core_in_board >> (MAILBOX_BITS + CORE_BITS)) & mailbox_mask,
            mailbox_x: (core_in_board >> CORE_BITS) & mailbox_mask,
            core: core_in_board & ((1 << CORE_BITS) - 1),
            thread,
        }
    }

    /// Pack the address, checking every field against its width.
    pub fn encode(&self) -> Result<u32, SimError> {
        let mut packed = field("board_y", self.board_y, BOARD_BITS)?;
        packed = (packed << BOARD_BITS) | field("board_x", self.board_x, BOARD_BITS)?;
        packed = (packed << MAILBOX_BITS) | field("mailbox_y", self.mailbox_y, MAILBOX_BITS)?;
        packed = (packed << MAILBOX_BITS) | field("mailbox_x", self.mailbox_x, MAILBOX_BITS)?;
        packed = (packed << CORE_BITS) | field("core", self.core, CORE_BITS)?;
        packed = (packed << THREAD_BITS) | field("thread", self.thread, THREAD_BITS)?;
        Ok(packed)
    }

    pub fn decode(packed: u32) -> Result<Self, SimError> {
        if packed >> ADDRESS_BITS != 0 {
            return sim_error!(format!("slot address 0x{packed:x} out of range"));
        }
        let take = |shift: u32, bits: u32| (packed >> shift) & ((1 << bits) - 1);
        Ok(Self {
            board_y: take(BOARD_SHIFT + BOARD_BITS, BOARD_BITS),
            board_x: take(BOARD_SHIFT, BOARD_BITS),
            mailbox_y: take(MAILBOX_SHIFT + MAILBOX_BITS, MAILBOX_BITS),
            mailbox_x: take(MAILBOX_SHIFT, MAILBOX_BITS),
            core: take(CORE_SHIFT, CORE_BITS),
            thread: take(0, THREAD_BITS),
        })
    }

    /// Core index within the board.
    #[must_use]
    pub fn core_in_board(&self) -> u32 {
        (((self.mailbox_y << MAILBOX_BITS) | self.mailbox_x) << CORE_BITS) | self.core
    }

    #[must_use]
    pub fn thread_in_board(&self) -> u32 {
        (self.core_in_board() << THREAD_BITS) | self.thread
    }

    /// Which of the board's DRAMs holds this slot's heap.
    #[must_use]
    pub fn dram_index(&self) -> u32 {
        self.core_in_board() / CORES_PER_DRAM
    }

    /// Index of this slot's heap partition within its DRAM.
    #[must_use]
    pub fn partition_index(&self) -> u32 {
        self.thread_in_board() % THREADS_PER_DRAM
    }

    /// Base address of this slot's private heap partition.
    #[must_use]
    pub fn heap_base(&self, partition_bytes: u32) -> u32 {
        let dram_bytes = 1u64 << LOG_BYTES_PER_DRAM;
        let used = u64::from(self.partition_index() + 1) * u64::from(partition_bytes);
        let offset = dram_bytes - used;
        0x8000_0000 | offset as u32
    }

    /// Is this slot inside a mesh of the given dimensions?
    #[must_use]
    pub fn within(&self, dims: &MeshDims) -> bool {
        self.board_x < dims.boards_x
            && self.board_y < dims.boards_y
            && self.mailbox_x < dims.mailboxes_x
            && self.mailbox_y < dims.mailboxes_y
            && self.core < dims.cores_per_mailbox
            && self.thread < dims.threads_per_core
    }

    fn packed_unchecked(&self) -> u32 {
        let mut packed = self.board_y;
        packed = (packed << BOARD_BITS) | self.board_x;
        packed = (packed << MAILBOX_BITS) | self.mailbox_y;
        packed = (packed << MAILBOX_BITS) | self.mailbox_x;
        packed = (packed << CORE_BITS) | self.core;
        (packed << THREAD_BITS) | self.thread
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot_0x{:04x}", self.packed_unchecked())
    }
}

/// Thread id of the first thread of the core holding `thread_id`.
#[must_use]
pub fn core_of(thread_id: u32) -> u32 {
    thread_id >> CORE_SHIFT
}

/// One cache is shared by all threads of a mailbox.
#[must_use]
pub fn cache_of(thread_id: u32) -> u32 {
    thread_id >> MAILBOX_SHIFT
}

#[must_use]
pub fn board_of(thread_id: u32) -> u32 {
    thread_id >> BOARD_SHIFT
}

/// Every slot of the mesh in ascending address order.
#[must_use]
pub fn all_slots(dims: &MeshDims) -> Vec<SlotAddress> {
    let mut slots = Vec::with_capacity(dims.num_slots() as usize);
    for board_y in 0..dims.boards_y {
        for board_x in 0..dims.boards_x {
            for mailbox_y in 0..dims.mailboxes_y {
                for mailbox_x in 0..dims.mailboxes_x {
                    for core in 0..dims.cores_per_mailbox {
                        for thread in 0..dims.threads_per_core {
                            slots.push(SlotAddress {
                                board_y,
                                board_x,
                                mailbox_y,
                                mailbox_x,
                                core,
                                thread,
                            });
                        }
                    }
                }
            }
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_order() {
        let slot = SlotAddress {
            board_y: 1,
            board_x: 2,
            mailbox_y: 3,
            mailbox_x: 1,
            core: 2,
            thread: 5,
        };
        let packed = slot.encode().unwrap();
        assert_eq!(packed, (1 << 13) | (2 << 10) | (3 << 8) | (1 << 6) | (2 << 4) | 5);
        assert_eq!(SlotAddress::decode(packed).unwrap(), slot);
        assert_eq!(board_of(packed), (1 << 3) | 2);
        assert_eq!(cache_of(packed), (((1 << 3) | 2) << 4) | (3 << 2) | 1);
    }

    #[test]
    fn field_too_wide() {
        let slot = SlotAddress {
            thread: 16,
            ..SlotAddress::default()
        };
        assert_eq!(
            slot.encode().unwrap_err().to_string(),
            "Error: slot address thread 16 does not fit in 4 bits"
        );
    }

    #[test]
    fn decode_out_of_range() {
        assert!(SlotAddress::decode(1 << 16).is_err());
        assert!(SlotAddress::decode(0xffff).is_ok());
    }

    #[test]
    fn heap_partitions_do_not_overlap() {
        let bytes = 1 << 20;
        let first = SlotAddress::default();
        let second = SlotAddress {
            thread: 1,
            ..first
        };
        assert_eq!(first.heap_base(bytes), 0x8000_0000 | ((1 << 30) - bytes));
        assert_eq!(first.heap_base(bytes) - second.heap_base(bytes), bytes);
    }

    #[test]
    fn core_round_trip() {
        let slot = SlotAddress::from_core(1, 0, 0b10_01_11, 9);
        assert_eq!(slot.mailbox_y, 2);
        assert_eq!(slot.mailbox_x, 1);
        assert_eq!(slot.core, 3);
        assert_eq!(slot.core_in_board(), 0b10_01_11);
    }
}
