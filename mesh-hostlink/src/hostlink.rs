// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The host's session with a mesh.
//!
//! A [`HostLink`] walks a backend through boot, go and the exchange of
//! messages, and checks that callers do things in that order. Messages to
//! and from devices are framed with the same [`MsgHeader`] the slots use, so
//! the host is just another sender as far as a device is concerned.

use std::rc::Rc;

use mesh_engine::sim_error;
use mesh_engine::types::{SimError, SimResult};
use mesh_graph::address::SlotAddress;
use mesh_mapper::image::HeapImage;
use mesh_mapper::pgraph::DeviceAddr;
use mesh_runtime::message::{
    FLAG_HOST, MsgHeader, NO_EDGE, decode_payload, encode_payload, payload_bytes,
};
use mesh_track::entity::Entity;
use mesh_track::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::Backend;
use crate::counters::PerfCounterAccumulator;
use crate::memfile::MemFile;
use crate::wire::{FLIT_BYTES, num_flits};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Booted,
    Running,
}

/// A device message received by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostMessage<M> {
    /// Global id of the sending device.
    pub device: u32,

    /// Step of the sender when it sent the message.
    pub stamp: u32,
    pub msg: M,
}

pub struct HostLink<B: Backend> {
    pub entity: Rc<Entity>,
    backend: B,
    phase: Phase,
    received: u64,
}

impl<B: Backend> HostLink<B> {
    pub fn new(parent: &Rc<Entity>, backend: B) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "hostlink")),
            backend,
            phase: Phase::Idle,
            received: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn load_program(&mut self, code: &MemFile, data: &MemFile) -> SimResult {
        if self.phase != Phase::Idle {
            return sim_error!(format!("{}: program loaded after boot", self.entity));
        }
        let (code_bytes, data_bytes) = (code.num_bytes(), data.num_bytes());
        info!(self.entity ; "loading {code_bytes} code and {data_bytes} data bytes");
        self.backend.load_program(code, data)
    }

    pub fn boot(&mut self, images: &[HeapImage]) -> SimResult {
        if self.phase != Phase::Idle {
            return sim_error!(format!("{}: already booted", self.entity));
        }
        let bytes: usize = images.iter().map(|image| image.bytes.len()).sum();
        info!(self.entity ; "booting {} slots, {bytes} bytes", images.len());
        self.backend.boot(images)?;
        self.phase = Phase::Booted;
        Ok(())
    }

    pub fn go(&mut self) -> SimResult {
        match self.phase {
            Phase::Idle => sim_error!(format!("{}: go before boot", self.entity)),
            Phase::Running => sim_error!(format!("{}: already running", self.entity)),
            Phase::Booted => {
                info!(self.entity ; "go");
                self.backend.go()?;
                self.phase = Phase::Running;
                Ok(())
            }
        }
    }

    /// Send a raw message to a slot.
    pub fn send(&mut self, slot: SlotAddress, msg: &[u8]) -> SimResult {
        if self.phase == Phase::Idle {
            return sim_error!(format!("{}: send to {slot} before boot", self.entity));
        }
        self.backend.send(slot, msg)
    }

    /// Send `msg` to one device. It arrives on no edge.
    pub fn send_to_device<M: Serialize>(&mut self, addr: DeviceAddr, msg: &M) -> SimResult {
        let header = MsgHeader {
            device: u32::from(addr.local),
            edge: NO_EDGE,
            stamp: 0,
            flags: FLAG_HOST,
        };
        let frame = header.frame(&encode_payload(msg)?);
        debug!(self.entity ; "message for {} device {}", addr.slot, addr.local);
        self.send(addr.slot, &frame)
    }

    /// Wait for the next raw message. Returns `None` once the mesh has
    /// terminated and every message has been taken.
    pub fn recv(&mut self) -> Result<Option<Vec<u8>>, SimError> {
        if self.phase != Phase::Running {
            return sim_error!(format!("{}: recv before go", self.entity));
        }
        let msg = self.backend.queue().recv()?;
        if msg.is_some() {
            self.received += 1;
        }
        Ok(msg)
    }

    /// Take a raw message if one is waiting.
    pub fn try_recv(&mut self) -> Result<Option<Vec<u8>>, SimError> {
        let msg = self.backend.queue().try_recv()?;
        if msg.is_some() {
            self.received += 1;
        }
        Ok(msg)
    }

    /// Wait for the next device message and decode it as `M`.
    ///
    /// A message whose size does not match `M` is an error. Transports that
    /// pad messages to whole flits can only be checked to that granularity.
    pub fn recv_msg<M>(&mut self) -> Result<Option<HostMessage<M>>, SimError>
    where
        M: Serialize + DeserializeOwned + Default,
    {
        let Some(frame) = self.recv()? else {
            return Ok(None);
        };
        let expected = MsgHeader::BYTES + payload_bytes::<M>()? as usize;
        let padded = num_flits(expected) * FLIT_BYTES;
        if frame.len() != expected && frame.len() != padded {
            return sim_error!(format!(
                "{}: expected {expected} byte messages, received {} bytes",
                self.entity,
                frame.len()
            ));
        }
        let (header, payload) = MsgHeader::parse(&frame)?;
        let payload = &payload[..expected - MsgHeader::BYTES];
        Ok(Some(HostMessage {
            device: header.device,
            stamp: header.stamp,
            msg: decode_payload(payload)?,
        }))
    }

    /// Feed every counter line of the run into `acc`. Waits for the run to
    /// end.
    pub fn collect_counters(&mut self, acc: &mut PerfCounterAccumulator) -> SimResult {
        if self.phase != Phase::Running {
            return sim_error!(format!("{}: counters requested before go", self.entity));
        }
        for (thread, line) in self.backend.counter_lines()? {
            acc.process_line(thread, &line)?;
        }
        if !acc.is_complete() {
            info!(self.entity ; "received {} of {} counters", acc.received(), acc.expected());
        }
        Ok(())
    }

    #[must_use]
    pub fn num_received(&self) -> u64 {
        self.received
    }
}
