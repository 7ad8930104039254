// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The synchronized discipline.
//!
//! Every device keeps a time step. At the start of a step it sends once on
//! every pin table entry that has neighbours: its application message if its
//! pin selects that entry, otherwise a sync-only message. A device finishes a
//! step once all of its messages have left the slot and it has received one
//! message per incoming edge stamped with its current time. Messages stamped
//! one step ahead are held until the next step starts. Sync edges guarantee
//! that no neighbour can get further ahead than that.

use std::collections::VecDeque;

use mesh_engine::sim_error;
use mesh_engine::types::{SimError, SimResult};
use mesh_track::{debug, trace};

use crate::device::{Device, Pin};
use crate::interp::Interpreter;
use crate::message::{FLAG_SYNC, MsgHeader, NO_EDGE, encode_payload};
use crate::ops::{IdleStatus, SlotOps, WakeupCond};

#[derive(Default)]
struct StepState {
    time: u32,
    count_in: u32,
    expected: u32,
    retired: bool,

    /// Messages queued by this device that have not left the slot.
    out_pending: u32,

    /// Messages stamped `time + 1`.
    early: Vec<(MsgHeader, Vec<u8>)>,
    started_at: u64,
}

enum Dest {
    Local,
    Remote(u32),
    Host,
}

struct Outgoing {
    src: usize,
    dest: Dest,
    frame: Vec<u8>,
}

#[derive(Default)]
struct Barrier {
    devices: Vec<StepState>,
    outbox: VecDeque<Outgoing>,
}

impl<D: Device> Interpreter<D> {
    pub(super) async fn run_sync<O: SlotOps + ?Sized>(&mut self, ops: &O) -> SimResult {
        let mut barrier = Barrier {
            devices: self
                .program
                .devices
                .iter()
                .map(|device| StepState {
                    expected: device.num_in,
                    ..StepState::default()
                })
                .collect(),
            outbox: VecDeque::new(),
        };

        self.init_all();
        for local in 0..self.program.num_devices() {
            self.start_step(ops, &mut barrier, local)?;
        }

        loop {
            let mut progressed = false;

            for local in 0..self.program.num_devices() {
                progressed |= self.try_complete_step(ops, &mut barrier, local)?;
            }

            while let Some(out) = barrier.outbox.front() {
                match out.dest {
                    Dest::Local => {}
                    Dest::Remote(_) | Dest::Host if ops.can_send() => {}
                    _ => {
                        self.counters.blocked_sends += 1;
                        break;
                    }
                }
                let Some(out) = barrier.outbox.pop_front() else {
                    break;
                };
                barrier.devices[out.src].out_pending -= 1;
                progressed = true;
                match out.dest {
                    Dest::Local => self.incoming(ops, &mut barrier, &out.frame)?,
                    Dest::Remote(slot) => {
                        ops.send(slot, out.frame)?;
                        self.counters.msgs_sent += 1;
                    }
                    Dest::Host => {
                        ops.send_host(out.frame)?;
                        self.counters.msgs_sent += 1;
                    }
                }
            }

            while let Some(frame) = ops.recv() {
                self.incoming(ops, &mut barrier, &frame)?;
                progressed = true;
            }

            if progressed {
                ops.tick().await;
            } else if !barrier.outbox.is_empty() {
                ops.wait_until(WakeupCond::CAN_SEND | WakeupCond::CAN_RECV).await;
            } else if ops.idle(true).await == IdleStatus::Done {
                break;
            }
        }

        for (local, state) in barrier.devices.iter().enumerate() {
            self.steps[local] = state.time;
        }
        Ok(())
    }

    /// Queue the messages of device `local` for its current step.
    fn start_step<O: SlotOps + ?Sized>(
        &mut self,
        ops: &O,
        barrier: &mut Barrier,
        local: usize,
    ) -> SimResult {
        let time = barrier.devices[local].time;
        barrier.devices[local].started_at = ops.ticks();

        let num_entries = self.program.devices[local].entries.len();
        let mut sent = vec![false; num_entries];
        let mut sent_host = false;
        loop {
            let pin = self.pins[local];
            let entry = match pin {
                Pin::No => break,
                Pin::Host if sent_host => break,
                Pin::Host => None,
                Pin::App(_) => {
                    let entry = self.entry_of(local, pin)?;
                    if sent[entry] {
                        // Sent on this pin already; it goes out next step.
                        break;
                    }
                    Some(entry)
                }
            };

            let msg = self.call_send(ops, local);
            match entry {
                None => {
                    sent_host = true;
                    let frame = self.host_frame(local, time, &msg)?;
                    self.queue(barrier, local, Dest::Host, frame);
                }
                Some(entry) => {
                    sent[entry] = true;
                    let payload = encode_payload(&msg)?;
                    self.queue_multicast(barrier, local, entry, time, 0, &payload);
                }
            }
        }

        let filler = vec![0; self.program.message_bytes as usize];
        for (entry, done) in sent.into_iter().enumerate() {
            if !done {
                self.queue_multicast(barrier, local, entry, time, FLAG_SYNC, &filler);
            }
        }
        Ok(())
    }

    fn queue(&self, barrier: &mut Barrier, src: usize, dest: Dest, frame: Vec<u8>) {
        barrier.devices[src].out_pending += 1;
        barrier.outbox.push_back(Outgoing { src, dest, frame });
    }

    fn queue_multicast(
        &self,
        barrier: &mut Barrier,
        src: usize,
        entry: usize,
        stamp: u32,
        flags: u32,
        payload: &[u8],
    ) {
        for neighbour in &self.program.devices[src].entries[entry] {
            let header = MsgHeader {
                device: u32::from(neighbour.local),
                edge: u32::from(neighbour.key),
                stamp,
                flags,
            };
            let dest = if neighbour.slot == self.here {
                Dest::Local
            } else {
                Dest::Remote(neighbour.slot)
            };
            self.queue(barrier, src, dest, header.frame(payload));
        }
    }

    /// Finish the current step of device `local` if it can. Returns true if
    /// the step was finished.
    fn try_complete_step<O: SlotOps + ?Sized>(
        &mut self,
        ops: &O,
        barrier: &mut Barrier,
        local: usize,
    ) -> Result<bool, SimError> {
        let state = &barrier.devices[local];
        if state.retired || state.out_pending > 0 || state.count_in < state.expected {
            return Ok(false);
        }

        let carry_on = self.program.devices[local]
            .state
            .step(&mut self.pins[local]);
        let state = &mut barrier.devices[local];
        self.counters.record_step(ops.ticks() - state.started_at);
        state.time += 1;
        state.count_in = 0;
        if !carry_on {
            trace!(self.entity ; "device {} retires at step {}",
                self.program.devices[local].global_id, state.time);
            state.retired = true;
            if !state.early.is_empty() {
                debug!(self.entity ; "device {} retired with {} messages for the next step",
                    self.program.devices[local].global_id, state.early.len());
                self.counters.dropped += state.early.len() as u64;
                state.early.clear();
            }
            return Ok(true);
        }

        self.start_step(ops, barrier, local)?;
        let early = std::mem::take(&mut barrier.devices[local].early);
        for (header, payload) in early {
            self.accept(ops, barrier, local, &header, &payload)?;
        }
        Ok(true)
    }

    /// Handle a message that reached this slot.
    fn incoming<O: SlotOps + ?Sized>(
        &mut self,
        ops: &O,
        barrier: &mut Barrier,
        frame: &[u8],
    ) -> SimResult {
        let (header, local, payload) = self.unpack(frame)?;
        let state = &mut barrier.devices[local];
        if header.is_host() {
            let msg = self.decode(payload)?;
            self.receive(ops, local, NO_EDGE, &msg)?;
            return Ok(());
        }
        if state.retired {
            debug!(self.entity ; "device {} retired at step {}, dropped message for step {}",
                self.program.devices[local].global_id, state.time, header.stamp);
            self.counters.dropped += 1;
            return Ok(());
        }

        if header.stamp == state.time {
            self.accept(ops, barrier, local, &header, payload)
        } else if header.stamp == state.time.wrapping_add(1) {
            if state.early.len() >= state.expected as usize {
                return sim_error!(format!(
                    "{}: next-step buffer of device {} is full",
                    self.entity, self.program.devices[local].global_id
                ));
            }
            state.early.push((header, payload.to_vec()));
            Ok(())
        } else {
            sim_error!(format!(
                "{}: message for step {} reached device {} at step {}",
                self.entity, header.stamp, self.program.devices[local].global_id, state.time
            ))
        }
    }

    /// Count a message of the current step and hand it to the device.
    fn accept<O: SlotOps + ?Sized>(
        &mut self,
        ops: &O,
        barrier: &mut Barrier,
        local: usize,
        header: &MsgHeader,
        payload: &[u8],
    ) -> SimResult {
        barrier.devices[local].count_in += 1;
        if !header.is_sync() {
            let msg = self.decode(payload)?;
            self.receive(ops, local, header.edge, &msg)?;
        }
        Ok(())
    }
}

