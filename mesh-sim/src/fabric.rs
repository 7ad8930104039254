// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The emulated message fabric shared by every slot of a run.
//!
//! A send takes a credit and queues the message on the channel between the
//! two slots with an arrival tick. Arrival ticks never decrease along a
//! channel, so each delivery takes the oldest message of its channel and
//! messages between a pair of slots keep their order. Messages on different
//! channels overtake each other freely.
//!
//! Slots that have nothing to do vote in the idle detection. The mesh is
//! idle when every running slot is voting, every inbox is empty and nothing
//! is in flight.
//!
//! Messages the host sends while the mesh runs arrive on a channel from the
//! host's thread. They are picked up on every tick and before every idle
//! verdict, so a mesh that keeps voting to continue can wait on the host.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::rc::Rc;
use std::sync::mpsc::{Receiver, TryRecvError};

use async_trait::async_trait;
use mesh_engine::events::repeated::Repeated;
use mesh_engine::executor::Spawner;
use mesh_engine::sim_error;
use mesh_engine::time::clock::Clock;
use mesh_engine::traits::Event;
use mesh_engine::types::{SimError, SimResult};
use mesh_graph::address::{SlotAddress, board_of};
use mesh_hostlink::queue::HostQueue;
use mesh_runtime::ops::{IdleStatus, SlotOps, WakeupCond};
use mesh_track::entity::Entity;
use mesh_track::{debug, trace};
use rand::rngs::StdRng;

use crate::delay::Latency;

struct SlotState {
    wake: Repeated<()>,
    inbox: VecDeque<Vec<u8>>,

    /// The slot's vote while it waits in the idle detection.
    vote: Option<bool>,
    verdict: Option<IdleStatus>,
    finished: bool,
    idle_ticks: u64,
}

impl SlotState {
    fn new() -> Self {
        Self {
            wake: Repeated::default(),
            inbox: VecDeque::new(),
            vote: None,
            verdict: None,
            finished: false,
            idle_ticks: 0,
        }
    }
}

#[derive(Default)]
struct Channel {
    messages: VecDeque<Vec<u8>>,
    last_arrival: u64,
}

/// Messages sent by the slots of one board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoardTraffic {
    pub sent: u64,

    /// Of those, the ones addressed to another board.
    pub inter_board: u64,
}

pub struct Fabric {
    pub entity: Rc<Entity>,
    clock: Clock,
    spawner: Spawner,
    latency: Latency,
    rng: RefCell<StdRng>,
    max_in_flight: u32,
    in_flight: Cell<u32>,
    slots: RefCell<BTreeMap<u32, SlotState>>,
    channels: RefCell<HashMap<(u32, u32), Channel>>,

    /// Slots waiting for a credit.
    blocked: RefCell<BTreeSet<u32>>,
    traffic: RefCell<BTreeMap<u32, BoardTraffic>>,
    host: HostQueue,

    /// Messages from the host as `(slot, frame)`, until the run ends.
    host_in: RefCell<Option<Receiver<(u32, Vec<u8>)>>>,

    /// First error raised where it could not be returned.
    fault: RefCell<Option<SimError>>,
}

impl Fabric {
    pub fn new(
        parent: &Rc<Entity>,
        clock: Clock,
        spawner: Spawner,
        latency: Latency,
        rng: StdRng,
        max_in_flight: u32,
        host: HostQueue,
        host_in: Receiver<(u32, Vec<u8>)>,
    ) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "fabric")),
            clock,
            spawner,
            latency,
            rng: RefCell::new(rng),
            max_in_flight,
            in_flight: Cell::new(0),
            slots: RefCell::new(BTreeMap::new()),
            channels: RefCell::new(HashMap::new()),
            blocked: RefCell::new(BTreeSet::new()),
            traffic: RefCell::new(BTreeMap::new()),
            host,
            host_in: RefCell::new(Some(host_in)),
            fault: RefCell::new(None),
        }
    }

    /// Add a slot that will run a program.
    pub fn attach(&self, id: u32) -> SimResult {
        if self.slots.borrow_mut().insert(id, SlotState::new()).is_some() {
            return sim_error!(format!("{}: slot 0x{id:04x} attached twice", self.entity));
        }
        Ok(())
    }

    /// Put a message from the host straight into a slot's inbox.
    pub fn inject(&self, id: u32, msg: Vec<u8>) -> SimResult {
        let mut slots = self.slots.borrow_mut();
        let Some(state) = slots.get_mut(&id) else {
            return sim_error!(format!(
                "{}: host message for slot 0x{id:04x}, which has no program",
                self.entity
            ));
        };
        state.inbox.push_back(msg);
        Ok(())
    }

    /// Move whatever the host has sent since the last call into the inboxes
    /// of their slots. Returns true if anything arrived.
    fn poll_host(&self) -> Result<bool, SimError> {
        let mut arrived = Vec::new();
        if let Some(host_in) = self.host_in.borrow().as_ref() {
            loop {
                match host_in.try_recv() {
                    Ok(msg) => arrived.push(msg),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                }
            }
        }
        let mut any = false;
        for (id, msg) in arrived {
            let finished = self.slots.borrow().get(&id).is_some_and(|state| state.finished);
            if finished {
                debug!(self.entity ; "host message for 0x{id:04x} after it finished, dropped");
                continue;
            }
            trace!(self.entity ; "host -> 0x{id:04x}");
            self.inject(id, msg)?;
            if let Some(wake) = self.wake_of(id) {
                wake.notify()?;
            }
            any = true;
        }
        Ok(any)
    }

    /// Stop taking messages from the host.
    pub fn close_host(&self) {
        self.host_in.borrow_mut().take();
    }

    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.tick_now().tick()
    }

    fn has_credit(&self) -> bool {
        self.in_flight.get() < self.max_in_flight
    }

    fn has_mail(&self, id: u32) -> bool {
        self.slots
            .borrow()
            .get(&id)
            .is_some_and(|state| !state.inbox.is_empty())
    }

    fn wake_of(&self, id: u32) -> Option<Repeated<()>> {
        self.slots.borrow().get(&id).map(|state| state.wake.clone())
    }

    fn send(self: &Rc<Self>, src: u32, dest: u32, msg: Vec<u8>) -> SimResult {
        if !self.slots.borrow().contains_key(&dest) {
            return sim_error!(format!(
                "{}: 0x{src:04x} sent to 0x{dest:04x}, which has no program",
                self.entity
            ));
        }
        if !self.has_credit() {
            return sim_error!(format!("{}: 0x{src:04x} sent without a credit", self.entity));
        }
        self.in_flight.set(self.in_flight.get() + 1);

        let now = self.now();
        let latency = self.latency.sample(&mut *self.rng.borrow_mut());
        let arrival = {
            let mut channels = self.channels.borrow_mut();
            let channel = channels.entry((src, dest)).or_default();
            channel.last_arrival = channel.last_arrival.max(now + latency);
            channel.messages.push_back(msg);
            channel.last_arrival
        };

        let board = board_of(src);
        let mut traffic = self.traffic.borrow_mut();
        let board_traffic = traffic.entry(board).or_default();
        board_traffic.sent += 1;
        if board_of(dest) != board {
            board_traffic.inter_board += 1;
        }

        let fabric = self.clone();
        self.spawner.spawn(async move {
            fabric.clock.wait_ticks(arrival - now).await;
            fabric.deliver(src, dest)
        });
        Ok(())
    }

    fn deliver(&self, src: u32, dest: u32) -> SimResult {
        let msg = self
            .channels
            .borrow_mut()
            .get_mut(&(src, dest))
            .and_then(|channel| channel.messages.pop_front());
        let Some(msg) = msg else {
            return sim_error!(format!(
                "{}: nothing to deliver from 0x{src:04x} to 0x{dest:04x}",
                self.entity
            ));
        };
        trace!(self.entity ; "0x{src:04x} -> 0x{dest:04x}");
        self.in_flight.set(self.in_flight.get() - 1);

        let wake = {
            let mut slots = self.slots.borrow_mut();
            let Some(state) = slots.get_mut(&dest) else {
                return sim_error!(format!("{}: 0x{dest:04x} vanished", self.entity));
            };
            state.inbox.push_back(msg);
            state.wake.clone()
        };
        wake.notify()?;

        let blocked = std::mem::take(&mut *self.blocked.borrow_mut());
        for id in blocked {
            if let Some(wake) = self.wake_of(id) {
                wake.notify()?;
            }
        }
        self.check_idle()
    }

    fn send_host(&self, msg: Vec<u8>) -> SimResult {
        self.host.push(msg)
    }

    /// Decide the idle detection if every running slot has voted.
    fn check_idle(&self) -> SimResult {
        if self.in_flight.get() > 0 {
            return Ok(());
        }
        let mut all_done = true;
        for state in self.slots.borrow().values().filter(|state| !state.finished) {
            match state.vote {
                Some(vote) if state.inbox.is_empty() => all_done &= vote,
                _ => return Ok(()),
            }
        }
        if self.poll_host()? {
            return Ok(());
        }
        let mut slots = self.slots.borrow_mut();
        let verdict = if all_done {
            IdleStatus::Done
        } else {
            IdleStatus::Idle
        };
        trace!(self.entity ; "mesh idle: {verdict:?}");
        for state in slots.values_mut().filter(|state| !state.finished) {
            state.vote = None;
            state.verdict = Some(verdict);
            state.wake.notify()?;
        }
        Ok(())
    }

    fn enter_idle(&self, id: u32, vote: bool) -> SimResult {
        if let Some(state) = self.slots.borrow_mut().get_mut(&id) {
            state.vote = Some(vote);
            state.verdict = None;
        }
        self.check_idle()
    }

    fn leave_idle(&self, id: u32) {
        if let Some(state) = self.slots.borrow_mut().get_mut(&id) {
            state.vote = None;
        }
    }

    fn take_verdict(&self, id: u32) -> Option<IdleStatus> {
        self.slots
            .borrow_mut()
            .get_mut(&id)
            .and_then(|state| state.verdict.take())
    }

    fn add_idle_ticks(&self, id: u32, ticks: u64) {
        if let Some(state) = self.slots.borrow_mut().get_mut(&id) {
            state.idle_ticks += ticks;
        }
    }

    /// A slot has run `finish` on all its devices.
    pub fn finish(&self, id: u32) -> SimResult {
        if let Some(state) = self.slots.borrow_mut().get_mut(&id) {
            state.finished = true;
            state.vote = None;
        }
        self.check_idle()
    }

    /// Slots that have not finished.
    #[must_use]
    pub fn running(&self) -> Vec<u32> {
        self.slots
            .borrow()
            .iter()
            .filter(|(_, state)| !state.finished)
            .map(|(&id, _)| id)
            .collect()
    }

    #[must_use]
    pub fn idle_ticks(&self, id: u32) -> Option<u64> {
        self.slots.borrow().get(&id).map(|state| state.idle_ticks)
    }

    #[must_use]
    pub fn traffic(&self, board: u32) -> BoardTraffic {
        self.traffic
            .borrow()
            .get(&board)
            .copied()
            .unwrap_or_default()
    }

    fn record(&self, result: SimResult) {
        if let Err(e) = result {
            self.fault.borrow_mut().get_or_insert(e);
        }
    }

    /// The first error raised inside a wait.
    pub fn take_fault(&self) -> SimResult {
        match self.fault.borrow_mut().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// One slot's view of the [`Fabric`].
pub struct SimSlotOps {
    fabric: Rc<Fabric>,
    addr: SlotAddress,
    id: u32,
}

impl SimSlotOps {
    pub fn new(fabric: &Rc<Fabric>, addr: SlotAddress) -> Result<Self, SimError> {
        Ok(Self {
            fabric: fabric.clone(),
            addr,
            id: addr.encode()?,
        })
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }
}

#[async_trait(?Send)]
impl SlotOps for SimSlotOps {
    fn address(&self) -> SlotAddress {
        self.addr
    }

    fn ticks(&self) -> u64 {
        self.fabric.now()
    }

    fn can_send(&self) -> bool {
        self.fabric.has_credit()
    }

    fn can_recv(&self) -> bool {
        self.fabric.has_mail(self.id)
    }

    fn send(&self, dest: u32, msg: Vec<u8>) -> SimResult {
        self.fabric.send(self.id, dest, msg)
    }

    fn send_host(&self, msg: Vec<u8>) -> SimResult {
        self.fabric.send_host(msg)
    }

    fn recv(&self) -> Option<Vec<u8>> {
        self.fabric
            .slots
            .borrow_mut()
            .get_mut(&self.id)
            .and_then(|state| state.inbox.pop_front())
    }

    async fn wait_until(&self, cond: WakeupCond) {
        let Some(wake) = self.fabric.wake_of(self.id) else {
            return;
        };
        let start = self.fabric.now();
        loop {
            let sendable = cond.contains(WakeupCond::CAN_SEND) && self.can_send();
            let receivable = cond.contains(WakeupCond::CAN_RECV) && self.can_recv();
            if sendable || receivable {
                break;
            }
            if cond.contains(WakeupCond::CAN_SEND) {
                self.fabric.blocked.borrow_mut().insert(self.id);
            }
            wake.listen().await;
        }
        self.fabric.add_idle_ticks(self.id, self.fabric.now() - start);
    }

    async fn tick(&self) {
        self.fabric.clock.wait_ticks(1).await;
        self.fabric.record(self.fabric.poll_host().map(|_| ()));
    }

    async fn idle(&self, vote: bool) -> IdleStatus {
        if self.can_recv() {
            return IdleStatus::NotIdle;
        }
        let Some(wake) = self.fabric.wake_of(self.id) else {
            return IdleStatus::Done;
        };
        let start = self.fabric.now();
        self.fabric.record(self.fabric.enter_idle(self.id, vote));
        let status = loop {
            if let Some(verdict) = self.fabric.take_verdict(self.id) {
                break verdict;
            }
            if self.can_recv() {
                self.fabric.leave_idle(self.id);
                break IdleStatus::NotIdle;
            }
            wake.listen().await;
        };
        self.fabric.add_idle_ticks(self.id, self.fabric.now() - start);
        status
    }
}
