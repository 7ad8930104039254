// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The asynchronous discipline.
//!
//! Devices that are ready to send wait on a stack. The slot works on one
//! multicast at a time, sending to one neighbour per iteration so that
//! receives keep being drained while a large fan-out is in progress.
//! Neighbours on the same slot are delivered by calling their receive handler
//! directly.

use mesh_engine::types::{SimError, SimResult};
use mesh_mapper::layout::Neighbour;
use mesh_track::trace;

use crate::device::{Device, Pin};
use crate::interp::Interpreter;
use crate::message::{MsgHeader, encode_payload};
use crate::ops::{IdleStatus, SlotOps, WakeupCond};

/// Devices waiting to send, each at most once.
struct SenderStack {
    stack: Vec<usize>,
    queued: Vec<bool>,
}

impl SenderStack {
    fn new(num_devices: usize) -> Self {
        Self {
            stack: Vec::with_capacity(num_devices),
            queued: vec![false; num_devices],
        }
    }

    fn push(&mut self, local: usize) {
        if !self.queued[local] {
            self.queued[local] = true;
            self.stack.push(local);
        }
    }

    fn top(&self) -> Option<usize> {
        self.stack.last().copied()
    }

    fn pop(&mut self) {
        if let Some(local) = self.stack.pop() {
            self.queued[local] = false;
        }
    }
}

/// A multicast in progress.
struct Multicast<M> {
    src: usize,
    entry: usize,
    next: usize,
    msg: M,
    payload: Vec<u8>,
}

impl<D: Device> Interpreter<D> {
    pub(super) async fn run_async<O: SlotOps + ?Sized>(&mut self, ops: &O) -> SimResult {
        let num_devices = self.program.num_devices();
        let mut senders = SenderStack::new(num_devices);
        self.init_all();
        for local in 0..num_devices {
            if self.pins[local].is_ready() {
                senders.push(local);
            }
        }

        let mut cursor: Option<Multicast<D::Message>> = None;
        let mut active = true;
        loop {
            let mut waited = false;
            let mut sent_all = false;

            if let Some(multicast) = cursor.as_mut() {
                let neighbours = &self.program.devices[multicast.src].entries[multicast.entry];
                match neighbours.get(multicast.next).copied() {
                    None => sent_all = true,
                    Some(neighbour) if neighbour.slot == self.here => {
                        let local = usize::from(neighbour.local);
                        multicast.next += 1;
                        self.counters.msgs_sent += 1;
                        let key = u32::from(neighbour.key);
                        if self.receive(ops, local, key, &multicast.msg)? {
                            senders.push(local);
                        }
                    }
                    Some(neighbour) => {
                        if ops.can_send() {
                            ops.send(neighbour.slot, frame_for(&neighbour, &multicast.payload))?;
                            multicast.next += 1;
                            self.counters.msgs_sent += 1;
                        } else {
                            self.counters.blocked_sends += 1;
                            ops.wait_until(WakeupCond::CAN_SEND | WakeupCond::CAN_RECV).await;
                            waited = true;
                        }
                    }
                }
            } else if let Some(local) = senders.top() {
                if ops.can_send() {
                    senders.pop();
                    let pin = self.pins[local];
                    if pin.is_ready() {
                        cursor = self.start_send(ops, local, pin)?;
                        if self.pins[local].is_ready() {
                            senders.push(local);
                        }
                    }
                } else {
                    self.counters.blocked_sends += 1;
                    ops.wait_until(WakeupCond::CAN_SEND | WakeupCond::CAN_RECV).await;
                    waited = true;
                }
            } else {
                waited = true;
                match ops.idle(!active).await {
                    IdleStatus::NotIdle => {}
                    IdleStatus::Idle => {
                        active = false;
                        for local in 0..num_devices {
                            if self.program.devices[local].state.step(&mut self.pins[local]) {
                                active = true;
                            }
                            self.steps[local] += 1;
                            if self.pins[local].is_ready() {
                                senders.push(local);
                            }
                        }
                        trace!(self.entity ; "idle step, active {active}");
                    }
                    IdleStatus::Done => break,
                }
            }

            if sent_all {
                cursor = None;
            }

            while let Some(frame) = ops.recv() {
                let (header, local, payload) = self.unpack(&frame)?;
                let msg = self.decode(payload)?;
                if self.receive(ops, local, header.edge, &msg)? {
                    senders.push(local);
                }
            }

            if !waited {
                ops.tick().await;
            }
        }
        Ok(())
    }

    /// Call the send handler of a ready device. Host messages go out at once,
    /// application messages start a multicast.
    fn start_send<O: SlotOps + ?Sized>(
        &mut self,
        ops: &O,
        local: usize,
        pin: Pin,
    ) -> Result<Option<Multicast<D::Message>>, SimError> {
        if pin == Pin::Host {
            let msg = self.call_send(ops, local);
            let frame = self.host_frame(local, self.steps[local], &msg)?;
            ops.send_host(frame)?;
            self.counters.msgs_sent += 1;
            return Ok(None);
        }
        let entry = self.entry_of(local, pin)?;
        let msg = self.call_send(ops, local);
        let payload = encode_payload(&msg)?;
        Ok(Some(Multicast {
            src: local,
            entry,
            next: 0,
            msg,
            payload,
        }))
    }
}

fn frame_for(neighbour: &Neighbour, payload: &[u8]) -> Vec<u8> {
    MsgHeader {
        device: u32::from(neighbour.local),
        edge: u32::from(neighbour.key),
        stamp: 0,
        flags: 0,
    }
    .frame(payload)
}
