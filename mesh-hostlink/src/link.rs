// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A backend that drives real boards over byte streams.
//!
//! One data stream carries [frames](crate::wire::Frame) to and from the mesh.
//! Every board also has a control stream carrying
//! [control packets](crate::control::ControlPacket). The transport under the
//! streams is not our business; anything that is `Read + Write` will do.
//!
//! Boot talks to the boot loader of each core directly on the data stream.
//! After `go` a receiver thread moves host-bound frames into the
//! [`HostQueue`] and one thread per board assembles the bytes slots print
//! into lines.

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::rc::Rc;
use std::thread::{self, JoinHandle};

use mesh_config::settings::{CORES_PER_DRAM, MeshDims};
use mesh_engine::sim_error;
use mesh_engine::types::{SimError, SimResult};
use mesh_graph::address::{SlotAddress, all_slots};
use mesh_mapper::image::HeapImage;
use mesh_track::entity::Entity;
use mesh_track::{debug, info, trace};

use crate::backend::Backend;
use crate::control::{
    BROADCAST_CORE, Channel, ControlPacket, DebugCmd, DebugReply, LineAssembler,
};
use crate::memfile::MemFile;
use crate::queue::HostQueue;
use crate::wire::{BootReq, Frame, instr_requests, send_boot, store_requests, words_of};

/// Both directions of one stream.
pub struct Link {
    pub rx: Box<dyn Read + Send>,
    pub tx: Box<dyn Write + Send>,
}

struct Board {
    x: u32,
    y: u32,
    tx: Box<dyn Write + Send>,
    rx: Option<Box<dyn Read + Send>>,
}

type Lines = Vec<(u32, String)>;

pub struct LinkBackend {
    pub entity: Rc<Entity>,
    dims: MeshDims,
    data_tx: Box<dyn Write + Send>,
    data_rx: Option<Box<dyn Read + Send>>,
    boards: Vec<Board>,
    queue: HostQueue,
    data_thread: Option<JoinHandle<SimResult>>,
    board_threads: Vec<JoinHandle<Result<Lines, SimError>>>,
}

impl LinkBackend {
    /// `controls` holds one link per board, boards in row-major order.
    pub fn new(
        parent: &Rc<Entity>,
        dims: MeshDims,
        data: Link,
        controls: Vec<Link>,
    ) -> Result<Self, SimError> {
        let entity = Rc::new(Entity::new(parent, "link"));
        if controls.len() != dims.num_boards() as usize {
            return sim_error!(format!(
                "{entity}: {} control links for {} boards",
                controls.len(),
                dims.num_boards()
            ));
        }
        let boards = controls
            .into_iter()
            .enumerate()
            .map(|(i, link)| Board {
                x: i as u32 % dims.boards_x,
                y: i as u32 / dims.boards_x,
                tx: link.tx,
                rx: Some(link.rx),
            })
            .collect();
        Ok(Self {
            entity,
            dims,
            data_tx: data.tx,
            data_rx: Some(data.rx),
            boards,
            queue: HostQueue::new(),
            data_thread: None,
            board_threads: Vec::new(),
        })
    }

    /// Thread 0 of every core.
    fn cores(&self) -> Vec<SlotAddress> {
        all_slots(&self.dims)
            .into_iter()
            .filter(|slot| slot.thread == 0)
            .collect()
    }

    /// The first core of every DRAM, which loads data on behalf of the rest.
    fn dram_cores(&self) -> Vec<SlotAddress> {
        let mut seen = BTreeSet::new();
        self.cores()
            .into_iter()
            .filter(|core| seen.insert((core.board_x, core.board_y, core.dram_index())))
            .collect()
    }

    fn boot_requests(&mut self, dest: &SlotAddress, reqs: &[BootReq]) -> SimResult {
        let id = dest.encode()?;
        for req in reqs {
            send_boot(self.data_tx.as_mut(), id, req)
                .map_err(|e| SimError(format!("{}: {dest}: {}", self.entity, e.0)))?;
        }
        Ok(())
    }

    /// Start every core and wait for each to acknowledge.
    fn start_cores(&mut self) -> SimResult {
        let cores = self.cores();
        for core in &cores {
            self.boot_requests(core, &[BootReq::start(self.dims.threads_per_core)])?;
        }
        let Some(rx) = self.data_rx.as_mut() else {
            return sim_error!(format!("{}: data link already handed over", self.entity));
        };
        for acked in 0..cores.len() {
            match Frame::read_from(rx.as_mut()) {
                Ok(Some(frame)) => {
                    trace!(self.entity ; "start acknowledged by 0x{:x}", frame.dest);
                }
                Ok(None) => {
                    return sim_error!(format!(
                        "{}: data link closed after {acked} of {} start acknowledgements",
                        self.entity,
                        cores.len()
                    ));
                }
                Err(e) => return sim_error!(format!("{}: data link: {e}", self.entity)),
            }
        }
        debug!(self.entity ; "{} cores started", cores.len());
        Ok(())
    }

    fn spawn_receivers(&mut self) -> SimResult {
        let Some(mut rx) = self.data_rx.take() else {
            return sim_error!(format!("{}: data link already handed over", self.entity));
        };
        let queue = self.queue.clone();
        let handle = thread::Builder::new()
            .name("data-link".to_string())
            .spawn(move || {
                let result = receive_frames(rx.as_mut(), &queue);
                match &result {
                    Ok(()) => queue.finish()?,
                    Err(e) => queue.fail(e.clone())?,
                }
                result
            })
            .map_err(|e| SimError(format!("{}: cannot start receiver: {e}", self.entity)))?;
        self.data_thread = Some(handle);

        for board in &mut self.boards {
            let Some(mut rx) = board.rx.take() else {
                continue;
            };
            let (x, y) = (board.x, board.y);
            let handle = thread::Builder::new()
                .name(format!("board-{x}-{y}"))
                .spawn(move || receive_lines(rx.as_mut(), x, y))
                .map_err(|e| SimError(format!("{}: cannot start receiver: {e}", self.entity)))?;
            self.board_threads.push(handle);
        }
        Ok(())
    }
}

fn receive_frames(rx: &mut dyn Read, queue: &HostQueue) -> SimResult {
    loop {
        match Frame::read_from(rx) {
            Ok(Some(frame)) => queue.push(frame.payload)?,
            Ok(None) => return Ok(()),
            Err(e) => return sim_error!(format!("data link: {e}")),
        }
    }
}

fn receive_lines(rx: &mut dyn Read, x: u32, y: u32) -> Result<Lines, SimError> {
    let board_error = |e: SimError| SimError(format!("board ({x}, {y}): {}", e.0));
    let mut assembler = LineAssembler::default();
    let mut lines = Vec::new();
    while let Some(packet) = ControlPacket::read_from(rx).map_err(board_error)? {
        if packet.channel != Channel::Uart {
            continue;
        }
        if let DebugReply::StdOut { thread, core, byte } =
            DebugReply::from_bytes(&packet.payload).map_err(board_error)?
        {
            let slot = SlotAddress::from_core(x, y, u32::from(core), u32::from(thread));
            let id = slot.encode().map_err(board_error)?;
            if let Some(line) = assembler.push(id, byte) {
                lines.push((id, line));
            }
        }
    }
    lines.extend(assembler.flush());
    Ok(lines)
}

impl Backend for LinkBackend {
    fn load_program(&mut self, code: &MemFile, data: &MemFile) -> SimResult {
        code.check_aligned()?;
        data.check_aligned()?;
        let instrs = instr_requests(&code.words());
        for core in self.cores() {
            self.boot_requests(&core, &instrs)?;
        }
        for core in self.dram_cores() {
            for segment in &data.segments {
                let reqs = store_requests(segment.addr, &words_of(&segment.bytes))?;
                self.boot_requests(&core, &reqs)?;
            }
        }
        Ok(())
    }

    fn boot(&mut self, images: &[HeapImage]) -> SimResult {
        for image in images {
            let slot = image.slot;
            let loader = SlotAddress::from_core(
                slot.board_x,
                slot.board_y,
                slot.dram_index() * CORES_PER_DRAM,
                0,
            );
            let reqs = store_requests(image.heap_base, &words_of(&image.bytes))?;
            trace!(self.entity ; "{slot}: {} requests via {loader}", reqs.len());
            self.boot_requests(&loader, &reqs)?;
        }
        self.start_cores()
    }

    fn go(&mut self) -> SimResult {
        for (link_id, board) in self.boards.iter_mut().enumerate() {
            let link_id = link_id as u8;
            let set_dest = DebugCmd::SetDest {
                thread: 0,
                core: BROADCAST_CORE,
            };
            for cmd in [set_dest, DebugCmd::StdIn(0)] {
                ControlPacket::uart(link_id, &cmd)
                    .write_to(board.tx.as_mut())
                    .map_err(|e| SimError(format!("board ({}, {}): {}", board.x, board.y, e.0)))?;
            }
        }
        info!(self.entity ; "released {} boards", self.boards.len());
        self.spawn_receivers()
    }

    fn send(&mut self, slot: SlotAddress, msg: &[u8]) -> SimResult {
        let frame = Frame::new(slot.encode()?, msg)?;
        frame
            .write_to(self.data_tx.as_mut())
            .map_err(|e| SimError(format!("{}: {slot}: {e}", self.entity)))
    }

    fn queue(&self) -> &HostQueue {
        &self.queue
    }

    fn counter_lines(&mut self) -> Result<Vec<(u32, String)>, SimError> {
        if let Some(handle) = self.data_thread.take() {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => return sim_error!(format!("{}: data receiver panicked", self.entity)),
            }
        }
        let mut lines = Vec::new();
        for handle in self.board_threads.drain(..) {
            match handle.join() {
                Ok(result) => lines.extend(result?),
                Err(_) => return sim_error!(format!("{}: board receiver panicked", self.entity)),
            }
        }
        Ok(lines)
    }
}
