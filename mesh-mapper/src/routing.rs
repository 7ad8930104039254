// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Tables for the per-board programmable routers.
//!
//! A table is a sequence of 32-byte beats. Each beat holds up to five 48-bit
//! chunks, filled from the top of the beat down, with the number of records
//! in byte 30. A record is one chunk (URM1, RR, IND) or two chunks (URM2,
//! MRM) and carries its tag in the top three bits of its last byte.
//!
//! A routing key names a run of beats: the table address of the first beat,
//! bit 31 selecting the second RAM, and the number of beats in the low bits.
//! Runs of more than 30 beats are chained through IND records.

use mesh_config::settings::{BOARD_BITS, MAILBOX_BITS};
use mesh_engine::sim_error;
use mesh_engine::types::SimError;

/// Beats are stored from this address in each DRAM.
pub const ROUTER_TABLE_BASE: u32 = 0x0100_0000;

/// Space reserved for the table in each DRAM.
pub const ROUTER_TABLE_BYTES: u32 = 0x0100_0000;

pub const BEAT_BYTES: usize = 32;
pub const DRAMS_PER_BOARD: usize = 2;

const CHUNK_BYTES: usize = 6;
const CHUNKS_PER_BEAT: u32 = 5;
const BEATS_PER_RUN: u32 = 31;
const RAM_BIT: u32 = 0x8000_0000;

const TAG_URM1: u8 = 0;
const TAG_URM2: u8 = 1;
const TAG_RR: u8 = 2;
const TAG_MRM: u8 = 3;
const TAG_IND: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direction {
    North = 0,
    South = 1,
    East = 2,
    West = 3,
}

impl Direction {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Direction::North,
            1 => Direction::South,
            2 => Direction::East,
            _ => Direction::West,
        }
    }
}

/// A decoded routing record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Record {
    /// Unicast to one thread of a local mailbox with a 32-bit key.
    Urm1 {
        mailbox_x: u32,
        mailbox_y: u32,
        thread: u32,
        key: u32,
    },
    /// Unicast to one thread of a local mailbox with a 64-bit key.
    Urm2 {
        mailbox_x: u32,
        mailbox_y: u32,
        thread: u32,
        key: u64,
    },
    /// Forward to the neighbouring board in `dir`, continuing with `key`.
    Rr { dir: Direction, key: u32 },
    /// Multicast to a set of threads of a local mailbox.
    Mrm {
        mailbox_x: u32,
        mailbox_y: u32,
        threads: u64,
        key: u16,
    },
    /// Continue with the beats named by `key`.
    Ind { key: u32 },
}

fn key_bytes(ptr: &mut [u8], key: u32) {
    ptr[..4].copy_from_slice(&key.to_le_bytes());
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Decode the records of one beat.
pub fn decode_beat(beat: &[u8]) -> Result<Vec<Record>, SimError> {
    if beat.len() != BEAT_BYTES {
        return sim_error!(format!("routing beat of {} bytes", beat.len()));
    }
    let num_records = beat[30];
    let mut records = Vec::with_capacity(num_records as usize);
    let mut chunk = 0;
    for _ in 0..num_records {
        if chunk >= CHUNKS_PER_BEAT as usize {
            return sim_error!(format!("routing beat claims {num_records} records"));
        }
        let top = CHUNK_BYTES * (4 - chunk);
        let tag = beat[top + 5] >> 5;
        let record = match tag {
            TAG_URM1 | TAG_RR | TAG_IND => {
                let ptr = &beat[top..top + CHUNK_BYTES];
                chunk += 1;
                match tag {
                    TAG_URM1 => Record::Urm1 {
                        mailbox_x: u32::from((ptr[5] >> 1) & 3),
                        mailbox_y: u32::from((ptr[5] >> 3) & 3),
                        thread: u32::from(ptr[4] >> 3) | (u32::from(ptr[5] & 1) << 5),
                        key: read_u32(ptr),
                    },
                    TAG_RR => Record::Rr {
                        dir: Direction::from_bits(ptr[5] >> 3),
                        key: read_u32(ptr),
                    },
                    _ => Record::Ind { key: read_u32(ptr) },
                }
            }
            TAG_URM2 | TAG_MRM => {
                if chunk + 2 > CHUNKS_PER_BEAT as usize {
                    return sim_error!("96-bit routing record crosses a beat");
                }
                let base = top - CHUNK_BYTES;
                let ptr = &beat[base..base + 2 * CHUNK_BYTES];
                chunk += 2;
                let low = u64::from(read_u32(ptr));
                let high = u64::from(read_u32(&ptr[4..]));
                if tag == TAG_URM2 {
                    Record::Urm2 {
                        mailbox_x: u32::from((ptr[11] >> 1) & 3),
                        mailbox_y: u32::from((ptr[11] >> 3) & 3),
                        thread: u32::from(ptr[10] >> 3) | (u32::from(ptr[11] & 1) << 5),
                        key: (high << 32) | low,
                    }
                } else {
                    Record::Mrm {
                        mailbox_x: u32::from((ptr[11] >> 1) & 3),
                        mailbox_y: u32::from((ptr[11] >> 3) & 3),
                        threads: (high << 32) | low,
                        key: u16::from_le_bytes([ptr[8], ptr[9]]),
                    }
                }
            }
            other => return sim_error!(format!("unknown routing record tag {other}")),
        };
        records.push(record);
    }
    Ok(records)
}

/// The programmable router table of one board.
#[derive(Clone, Debug)]
pub struct ProgRouter {
    /// Encoded beats for each RAM.
    pub tables: [Vec<u8>; DRAMS_PER_BOARD],
    num_chunks: u32,
    num_records: u32,

    /// Beats used by the key being built.
    num_beats: u32,
    current_ram: usize,

    /// Offset of an IND record still waiting for its key.
    pending_ind: Option<usize>,
}

impl Default for ProgRouter {
    fn default() -> Self {
        Self {
            tables: [vec![0; BEAT_BYTES], vec![0; BEAT_BYTES]],
            num_chunks: 0,
            num_records: 0,
            num_beats: 1,
            current_ram: 0,
            pending_ind: None,
        }
    }
}

impl ProgRouter {
    fn table_len(&self) -> u32 {
        self.tables[self.current_ram].len() as u32
    }

    fn ram_bit(&self) -> u32 {
        if self.current_ram == 1 { RAM_BIT } else { 0 }
    }

    fn next_beat(&mut self) -> Result<(), SimError> {
        let table = &mut self.tables[self.current_ram];
        let beat = table.len() - BEAT_BYTES;
        table[beat + 31] = 0;
        table[beat + 30] = self.num_records as u8;
        self.num_chunks = 0;
        self.num_records = 0;

        self.num_beats += 1;
        table.resize(table.len() + BEAT_BYTES, 0);
        if table.len() as u32 >= ROUTER_TABLE_BYTES - 1024 {
            return sim_error!("programmable router table full");
        }

        if self.num_beats % BEATS_PER_RUN == 0 {
            if let Some(ind) = self.pending_ind {
                let run = BEATS_PER_RUN * BEAT_BYTES as u32;
                let key =
                    (ROUTER_TABLE_BASE + self.table_len() - run) | self.ram_bit() | BEATS_PER_RUN;
                self.set_ind(ind, key);
            }
            self.pending_ind = Some(self.add_ind()?);
        }
        Ok(())
    }

    fn record48(&self) -> usize {
        self.table_len() as usize - BEAT_BYTES + CHUNK_BYTES * (4 - self.num_chunks as usize)
    }

    fn record96(&self) -> usize {
        self.table_len() as usize - BEAT_BYTES + CHUNK_BYTES * (3 - self.num_chunks as usize)
    }

    fn add_ind(&mut self) -> Result<usize, SimError> {
        if self.num_chunks == CHUNKS_PER_BEAT {
            self.next_beat()?;
        }
        let at = self.record48();
        self.tables[self.current_ram][at + 5] = TAG_IND << 5;
        self.num_chunks += 1;
        self.num_records += 1;
        Ok(at)
    }

    fn set_ind(&mut self, at: usize, key: u32) {
        key_bytes(&mut self.tables[self.current_ram][at..], key);
    }

    fn chunks48(&mut self) -> Result<usize, SimError> {
        if self.num_chunks == CHUNKS_PER_BEAT {
            self.next_beat()?;
        }
        let at = self.record48();
        self.num_chunks += 1;
        self.num_records += 1;
        Ok(at)
    }

    fn chunks96(&mut self) -> Result<usize, SimError> {
        if self.num_chunks >= CHUNKS_PER_BEAT - 1 {
            self.next_beat()?;
        }
        let at = self.record96();
        self.num_chunks += 2;
        self.num_records += 1;
        Ok(at)
    }

    pub fn add_urm1(
        &mut self,
        mailbox_x: u32,
        mailbox_y: u32,
        thread: u32,
        key: u32,
    ) -> Result<(), SimError> {
        let at = self.chunks48()?;
        let ptr = &mut self.tables[self.current_ram][at..at + CHUNK_BYTES];
        key_bytes(ptr, key);
        ptr[4] = ((thread & 0x1f) << 3) as u8;
        ptr[5] = (TAG_URM1 << 5) | ((mailbox_y << 3) | (mailbox_x << 1) | (thread >> 5)) as u8;
        Ok(())
    }

    pub fn add_urm2(
        &mut self,
        mailbox_x: u32,
        mailbox_y: u32,
        thread: u32,
        key: u64,
    ) -> Result<(), SimError> {
        let at = self.chunks96()?;
        let ptr = &mut self.tables[self.current_ram][at..at + 2 * CHUNK_BYTES];
        ptr[..8].copy_from_slice(&key.to_le_bytes());
        ptr[10] = ((thread & 0x1f) << 3) as u8;
        ptr[11] = (TAG_URM2 << 5) | ((mailbox_y << 3) | (mailbox_x << 1) | (thread >> 5)) as u8;
        Ok(())
    }

    pub fn add_rr(&mut self, dir: Direction, key: u32) -> Result<(), SimError> {
        let at = self.chunks48()?;
        let ptr = &mut self.tables[self.current_ram][at..at + CHUNK_BYTES];
        key_bytes(ptr, key);
        ptr[5] = (TAG_RR << 5) | ((dir as u8) << 3);
        Ok(())
    }

    pub fn add_mrm(
        &mut self,
        mailbox_x: u32,
        mailbox_y: u32,
        threads: u64,
        key: u16,
    ) -> Result<(), SimError> {
        let at = self.chunks96()?;
        let ptr = &mut self.tables[self.current_ram][at..at + 2 * CHUNK_BYTES];
        ptr[..8].copy_from_slice(&threads.to_le_bytes());
        ptr[8..10].copy_from_slice(&key.to_le_bytes());
        ptr[11] = (TAG_MRM << 5) | ((mailbox_y << 3) | (mailbox_x << 1)) as u8;
        Ok(())
    }

    /// Close the records added since the last key and return a key for them.
    pub fn gen_key(&mut self) -> Result<u32, SimError> {
        let index = self.table_len() - self.num_beats * BEAT_BYTES as u32;
        let final_len = if self.pending_ind.is_some() {
            BEATS_PER_RUN
        } else {
            self.num_beats
        };
        if let Some(ind) = self.pending_ind {
            let tail = self.num_beats % BEATS_PER_RUN;
            let key = (ROUTER_TABLE_BASE + self.table_len() - tail * BEAT_BYTES as u32)
                | self.ram_bit()
                | tail;
            self.set_ind(ind, key);
        }
        let key = (ROUTER_TABLE_BASE + index) | self.ram_bit() | final_len;

        self.next_beat()?;
        self.num_beats = 1;
        self.pending_ind = None;
        self.current_ram = usize::from(self.tables[0].len() >= self.tables[1].len());
        Ok(key)
    }

    /// All records reachable from `key`, following IND records.
    pub fn records(&self, key: u32) -> Result<Vec<Record>, SimError> {
        let ram = usize::from(key & RAM_BIT != 0);
        let addr = key & !RAM_BIT & !(BEAT_BYTES as u32 - 1);
        let beats = (key & (BEAT_BYTES as u32 - 1)) as usize;
        let Some(start) = addr.checked_sub(ROUTER_TABLE_BASE) else {
            return sim_error!(format!("routing key 0x{key:08x} below the table"));
        };
        let start = start as usize;
        let end = start + beats * BEAT_BYTES;
        if end > self.tables[ram].len() {
            return sim_error!(format!("routing key 0x{key:08x} beyond the table"));
        }

        let mut records = Vec::new();
        for beat in self.tables[ram][start..end].chunks_exact(BEAT_BYTES) {
            for record in decode_beat(beat)? {
                match record {
                    Record::Ind { key } => records.extend(self.records(key)?),
                    other => records.push(other),
                }
            }
        }
        Ok(records)
    }
}

/// A destination mailbox and the threads within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutingDest {
    /// Global mailbox id (board Y, board X, mailbox Y, mailbox X).
    pub mailbox: u32,

    /// Key handed to the receiving threads.
    pub key: u16,
    pub threads: u64,
}

#[must_use]
pub fn mailbox_x(mailbox: u32) -> u32 {
    mailbox & ((1 << MAILBOX_BITS) - 1)
}

#[must_use]
pub fn mailbox_y(mailbox: u32) -> u32 {
    (mailbox >> MAILBOX_BITS) & ((1 << MAILBOX_BITS) - 1)
}

#[must_use]
pub fn board_x(mailbox: u32) -> u32 {
    (mailbox >> (2 * MAILBOX_BITS)) & ((1 << BOARD_BITS) - 1)
}

#[must_use]
pub fn board_y(mailbox: u32) -> u32 {
    (mailbox >> (2 * MAILBOX_BITS + BOARD_BITS)) & ((1 << BOARD_BITS) - 1)
}

/// A delivery reached by following a key across boards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub board_x: u32,
    pub board_y: u32,
    pub record: Record,
}

/// The router tables of every board of the mesh.
#[derive(Clone, Debug)]
pub struct ProgRouterMesh {
    boards_x: u32,
    boards_y: u32,
    routers: Vec<ProgRouter>,
}

impl ProgRouterMesh {
    #[must_use]
    pub fn new(boards_x: u32, boards_y: u32) -> Self {
        Self {
            boards_x,
            boards_y,
            routers: vec![ProgRouter::default(); (boards_x * boards_y) as usize],
        }
    }

    pub fn router(&self, board_x: u32, board_y: u32) -> Option<&ProgRouter> {
        if board_x >= self.boards_x || board_y >= self.boards_y {
            return None;
        }
        self.routers.get((board_y * self.boards_x + board_x) as usize)
    }

    fn router_mut(&mut self, board_x: u32, board_y: u32) -> Result<&mut ProgRouter, SimError> {
        if board_x >= self.boards_x || board_y >= self.boards_y {
            return sim_error!(format!("no board ({board_x}, {board_y}) in the mesh"));
        }
        Ok(&mut self.routers[(board_y * self.boards_x + board_x) as usize])
    }

    /// Add records reaching `dests` from the given board and return their key.
    pub fn add_dests_from_board(
        &mut self,
        sender_x: u32,
        sender_y: u32,
        dests: &[RoutingDest],
    ) -> Result<u32, SimError> {
        if dests.is_empty() {
            return sim_error!("no routing destinations");
        }
        if sender_x >= self.boards_x || sender_y >= self.boards_y {
            return sim_error!(format!("no board ({sender_x}, {sender_y}) in the mesh"));
        }

        let mut local = Vec::new();
        let mut groups: [Vec<RoutingDest>; 4] = Default::default();
        for dest in dests {
            let (x, y) = (board_x(dest.mailbox), board_y(dest.mailbox));
            let dir = if x > sender_x {
                Direction::East
            } else if x < sender_x {
                Direction::West
            } else if y > sender_y {
                Direction::North
            } else if y < sender_y {
                Direction::South
            } else {
                local.push(*dest);
                continue;
            };
            groups[dir as usize].push(*dest);
        }

        for (dir, group) in [
            Direction::North,
            Direction::South,
            Direction::East,
            Direction::West,
        ]
        .into_iter()
        .zip(&groups)
        {
            if group.is_empty() {
                continue;
            }
            let (x, y) = step(sender_x, sender_y, dir);
            let key = self.add_dests_from_board(x, y, group)?;
            self.router_mut(sender_x, sender_y)?.add_rr(dir, key)?;
        }

        let router = self.router_mut(sender_x, sender_y)?;
        for dest in local {
            router.add_mrm(
                mailbox_x(dest.mailbox),
                mailbox_y(dest.mailbox),
                dest.threads,
                dest.key,
            )?;
        }
        router.gen_key()
    }

    pub fn add_dests_from_mailbox(
        &mut self,
        mailbox: u32,
        dests: &[RoutingDest],
    ) -> Result<u32, SimError> {
        self.add_dests_from_board(board_x(mailbox), board_y(mailbox), dests)
    }

    /// Follow `key` from the given board to every local delivery record.
    pub fn resolve(
        &self,
        board_x: u32,
        board_y: u32,
        key: u32,
    ) -> Result<Vec<Delivery>, SimError> {
        let Some(router) = self.router(board_x, board_y) else {
            return sim_error!(format!("no board ({board_x}, {board_y}) in the mesh"));
        };
        let mut deliveries = Vec::new();
        for record in router.records(key)? {
            match record {
                Record::Rr { dir, key } => {
                    let (x, y) = step(board_x, board_y, dir);
                    deliveries.extend(self.resolve(x, y, key)?);
                }
                record => deliveries.push(Delivery {
                    board_x,
                    board_y,
                    record,
                }),
            }
        }
        Ok(deliveries)
    }

    /// The encoded tables of each board: `(board_x, board_y, ram, bytes)`.
    pub fn tables(&self) -> impl Iterator<Item = (u32, u32, usize, &[u8])> {
        self.routers.iter().enumerate().flat_map(move |(i, router)| {
            let x = i as u32 % self.boards_x;
            let y = i as u32 / self.boards_x;
            router
                .tables
                .iter()
                .enumerate()
                .map(move |(ram, table)| (x, y, ram, table.as_slice()))
        })
    }
}

fn step(x: u32, y: u32, dir: Direction) -> (u32, u32) {
    match dir {
        Direction::North => (x, y + 1),
        Direction::South => (x, y.wrapping_sub(1)),
        Direction::East => (x + 1, y),
        Direction::West => (x.wrapping_sub(1), y),
    }
}
