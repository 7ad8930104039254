// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The per-slot interpreter.
//!
//! An [`Interpreter`] owns the devices of one slot and drives their handlers
//! against a [`SlotOps`]. Both scheduling disciplines share the receive path,
//! the host path and the final `finish` pass; they differ in how sends are
//! scheduled and when `step` is called:
//!
//! - [asynchronous](self::async_loop): ready devices sit on a sender stack and
//!   multicast one neighbour at a time; `step` runs when the mesh is idle.
//! - [synchronized](self::sync_loop): every device sends exactly once per
//!   edge per time step and steps once it has heard from every incoming edge.

use std::rc::Rc;

use mesh_config::settings::Discipline;
use mesh_engine::sim_error;
use mesh_engine::types::{SimError, SimResult};
use mesh_graph::address::SlotAddress;
use mesh_mapper::image::HeapImage;
use mesh_track::entity::Entity;
use mesh_track::{debug, trace};

use crate::counters::SlotCounters;
use crate::device::{Device, Pin};
use crate::message::{FLAG_HOST, MsgHeader, NO_EDGE, decode_payload, encode_payload};
use crate::ops::{SlotOps, WakeupCond};
use crate::program::SlotProgram;

mod async_loop;
mod sync_loop;

/// Final state of one device.
#[derive(Clone, Debug)]
pub struct DeviceOutcome<D> {
    pub global_id: u32,
    pub state: D,

    /// Time steps completed (synchronized) or idle steps taken (asynchronous).
    pub steps: u32,
}

#[derive(Clone, Debug)]
pub struct SlotReport<D> {
    pub slot: SlotAddress,
    pub counters: SlotCounters,
    pub devices: Vec<DeviceOutcome<D>>,
}

pub struct Interpreter<D: Device> {
    pub entity: Rc<Entity>,
    program: SlotProgram<D>,

    /// Packed address of this slot.
    here: u32,
    pins: Vec<Pin>,
    steps: Vec<u32>,
    counters: SlotCounters,

    /// Label handed to devices for messages from the host.
    no_edge: D::Edge,
}

impl<D: Device> Interpreter<D> {
    pub fn new(parent: &Rc<Entity>, program: SlotProgram<D>) -> Result<Self, SimError> {
        let here = program.slot.encode()?;
        let entity = Rc::new(Entity::new(parent, &program.slot.to_string()));
        let num_devices = program.num_devices();
        Ok(Self {
            entity,
            program,
            here,
            pins: vec![Pin::No; num_devices],
            steps: vec![0; num_devices],
            counters: SlotCounters::default(),
            no_edge: D::Edge::default(),
        })
    }

    /// Run the slot until the mesh terminates, then call `finish` on every
    /// device.
    pub async fn run<O: SlotOps + ?Sized>(mut self, ops: &O) -> Result<SlotReport<D>, SimError> {
        let discipline = self.program.discipline;
        debug!(self.entity ; "{} devices, {discipline:?}", self.program.num_devices());
        match discipline {
            Discipline::Async => self.run_async(ops).await?,
            Discipline::Sync => self.run_sync(ops).await?,
        }
        self.finish_all(ops).await?;
        debug!(self.entity ; "finished: {:?}", self.counters);
        Ok(self.report())
    }

    fn report(self) -> SlotReport<D> {
        let devices = self
            .program
            .devices
            .into_iter()
            .zip(self.steps)
            .map(|(device, steps)| DeviceOutcome {
                global_id: device.global_id,
                state: device.state,
                steps,
            })
            .collect();
        SlotReport {
            slot: self.program.slot,
            counters: self.counters,
            devices,
        }
    }

    fn init_all(&mut self) {
        for (device, pin) in self.program.devices.iter_mut().zip(self.pins.iter_mut()) {
            device.state.init(pin);
        }
    }

    /// Call the send handler of device `local`.
    fn call_send<O: SlotOps + ?Sized>(&mut self, ops: &O, local: usize) -> D::Message {
        let mut msg = D::Message::default();
        let start = ops.ticks();
        self.program.devices[local]
            .state
            .send(&mut msg, &mut self.pins[local]);
        self.counters.send_handler_calls += 1;
        self.counters.send_handler_ticks += ops.ticks() - start;
        msg
    }

    /// Call the receive handler of device `local` for a message that arrived
    /// on incoming edge `edge`. Returns true if the device became ready to
    /// send.
    fn receive<O: SlotOps + ?Sized>(
        &mut self,
        ops: &O,
        local: usize,
        edge: u32,
        msg: &D::Message,
    ) -> Result<bool, SimError> {
        let label = if edge == NO_EDGE {
            &self.no_edge
        } else {
            match self.program.in_edges.get(edge as usize) {
                Some(label) => label,
                None => {
                    return sim_error!(format!(
                        "{}: message on unknown incoming edge {edge}",
                        self.entity
                    ));
                }
            }
        };
        let was_ready = self.pins[local].is_ready();
        let start = ops.ticks();
        self.program.devices[local]
            .state
            .recv(msg, label, &mut self.pins[local]);
        self.counters.msgs_recv += 1;
        self.counters.recv_handler_ticks += ops.ticks() - start;
        Ok(!was_ready && self.pins[local].is_ready())
    }

    /// Split a received frame into its header, destination and payload.
    fn unpack<'a>(&self, frame: &'a [u8]) -> Result<(MsgHeader, usize, &'a [u8]), SimError> {
        let (header, payload) = MsgHeader::parse(frame)?;
        let local = header.device as usize;
        if local >= self.program.num_devices() {
            return sim_error!(format!(
                "{}: message for local device {local} of {}",
                self.entity,
                self.program.num_devices()
            ));
        }
        if payload.len() != self.program.message_bytes as usize {
            return sim_error!(format!(
                "{}: received {} byte payload, expected {}",
                self.entity,
                payload.len(),
                self.program.message_bytes
            ));
        }
        Ok((header, local, payload))
    }

    fn decode(&self, payload: &[u8]) -> Result<D::Message, SimError> {
        decode_payload(payload).map_err(|e| SimError(format!("{}: {}", self.entity, e.0)))
    }

    /// Neighbours of `pin` for device `local`.
    fn entry_of(&self, local: usize, pin: Pin) -> Result<usize, SimError> {
        let device = &self.program.devices[local];
        match pin.table_entry() {
            Some(entry) if (entry as usize) < device.entries.len() => Ok(entry as usize),
            _ => sim_error!(format!(
                "{}: device {} cannot send on {pin}",
                self.entity, device.global_id
            )),
        }
    }

    fn host_frame(&self, local: usize, stamp: u32, msg: &D::Message) -> Result<Vec<u8>, SimError> {
        let header = MsgHeader {
            device: self.program.devices[local].global_id,
            edge: NO_EDGE,
            stamp,
            flags: FLAG_HOST,
        };
        Ok(header.frame(&encode_payload(msg)?))
    }

    /// Send to the host, waiting for the slot to be able to send.
    async fn send_host<O: SlotOps + ?Sized>(&mut self, ops: &O, frame: Vec<u8>) -> SimResult {
        while !ops.can_send() {
            self.counters.blocked_sends += 1;
            ops.wait_until(WakeupCond::CAN_SEND).await;
        }
        ops.send_host(frame)?;
        self.counters.msgs_sent += 1;
        Ok(())
    }

    async fn finish_all<O: SlotOps + ?Sized>(&mut self, ops: &O) -> SimResult {
        for local in 0..self.program.num_devices() {
            let mut msg = D::Message::default();
            let device = &mut self.program.devices[local];
            if device.state.finish(&mut msg) {
                trace!(self.entity ; "device {} reports to host", device.global_id);
                let frame = self.host_frame(local, self.steps[local], &msg)?;
                self.send_host(ops, frame).await?;
            }
        }
        Ok(())
    }
}

/// Load `image` and run it to completion on `ops`.
pub async fn run_slot<D: Device, O: SlotOps + ?Sized>(
    parent: &Rc<Entity>,
    image: &HeapImage,
    ops: &O,
) -> Result<SlotReport<D>, SimError> {
    let program = SlotProgram::<D>::load(image)?;
    Interpreter::new(parent, program)?.run(ops).await
}
