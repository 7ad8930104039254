// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use async_trait::async_trait;
use mesh_config::settings::{Discipline, MeshDims, PlacerConfig};
use mesh_engine::engine::Engine;
use mesh_engine::run_simulation;
use mesh_engine::sim_error;
use mesh_engine::test_helpers::start_test;
use mesh_engine::types::SimResult;
use mesh_graph::address::SlotAddress;
use mesh_mapper::image::HeapImage;
use mesh_mapper::pgraph::{MapperConfig, PGraph};
use mesh_runtime::device::{Device, Pin};
use mesh_runtime::interp::{SlotReport, run_slot};
use mesh_runtime::message::{FLAG_HOST, MsgHeader, NO_EDGE, decode_payload, payload_bytes};
use mesh_runtime::ops::{IdleStatus, SlotOps, WakeupCond};
use serde::{Deserialize, Serialize};

/// A slot that is the whole mesh: sends to itself loop back and the mesh is
/// idle whenever the inbox is empty.
struct Loopback {
    addr: SlotAddress,
    inbox: RefCell<VecDeque<Vec<u8>>>,
    host: RefCell<Vec<Vec<u8>>>,
    ticks: Cell<u64>,
}

impl Loopback {
    fn new(addr: SlotAddress) -> Self {
        Self {
            addr,
            inbox: RefCell::new(VecDeque::new()),
            host: RefCell::new(Vec::new()),
            ticks: Cell::new(0),
        }
    }

    fn host_messages(&self) -> Vec<(u32, u32)> {
        self.host
            .borrow()
            .iter()
            .map(|frame| {
                let (header, payload) = MsgHeader::parse(frame).unwrap();
                assert!(header.is_host());
                (header.device, decode_payload(payload).unwrap())
            })
            .collect()
    }
}

#[async_trait(?Send)]
impl SlotOps for Loopback {
    fn address(&self) -> SlotAddress {
        self.addr
    }

    fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    fn can_send(&self) -> bool {
        true
    }

    fn can_recv(&self) -> bool {
        !self.inbox.borrow().is_empty()
    }

    fn send(&self, dest: u32, msg: Vec<u8>) -> SimResult {
        if dest != self.addr.encode()? {
            return sim_error!(format!("send to slot 0x{dest:04x}"));
        }
        self.inbox.borrow_mut().push_back(msg);
        Ok(())
    }

    fn send_host(&self, msg: Vec<u8>) -> SimResult {
        self.host.borrow_mut().push(msg);
        Ok(())
    }

    fn recv(&self) -> Option<Vec<u8>> {
        self.inbox.borrow_mut().pop_front()
    }

    async fn wait_until(&self, _cond: WakeupCond) {}

    async fn tick(&self) {
        self.ticks.set(self.ticks.get() + 1);
    }

    async fn idle(&self, vote: bool) -> IdleStatus {
        if self.can_recv() {
            IdleStatus::NotIdle
        } else if vote {
            IdleStatus::Done
        } else {
            IdleStatus::Idle
        }
    }
}

fn one_slot() -> MeshDims {
    MeshDims {
        mailboxes_x: 1,
        mailboxes_y: 1,
        cores_per_mailbox: 1,
        threads_per_core: 1,
        log_bytes_per_partition: 17,
        ..MeshDims::default()
    }
}

fn config(discipline: Discipline) -> MapperConfig {
    MapperConfig {
        dims: one_slot(),
        placer: PlacerConfig::default(),
        discipline,
        num_pins: 1,
        message_bytes: payload_bytes::<u32>().unwrap(),
    }
}

fn single_image<S, E>(graph: &mut PGraph<S, E>) -> HeapImage
where
    S: Serialize + Default,
    E: Serialize + Default,
{
    graph.map().unwrap();
    let mut images = graph.heap_images().unwrap();
    assert_eq!(images.len(), 1);
    images.remove(0)
}

fn run<D: Device>(
    engine: &mut Engine,
    image: HeapImage,
    ops: &Rc<Loopback>,
) -> Rc<RefCell<Option<SlotReport<D>>>> {
    let result = Rc::new(RefCell::new(None));
    let top = engine.top().clone();
    let ops = ops.clone();
    let report = result.clone();
    engine.spawn(async move {
        *report.borrow_mut() = Some(run_slot::<D, _>(&top, &image, &*ops).await?);
        Ok(())
    });
    result
}

/// Forwards a hop count around a ring. Device 0 reports it to the host.
#[derive(Clone, Default, Serialize, Deserialize)]
struct Ring {
    id: u32,
    hops: u32,
    holding: bool,
    finished: u32,
}

impl Device for Ring {
    type Edge = ();
    type Message = u32;

    fn init(&mut self, pin: &mut Pin) {
        if self.holding {
            *pin = Pin::App(0);
        }
    }

    fn send(&mut self, msg: &mut u32, pin: &mut Pin) {
        *msg = if *pin == Pin::Host { self.hops } else { self.hops + 1 };
        self.holding = false;
        *pin = Pin::No;
    }

    fn recv(&mut self, msg: &u32, _edge: &(), pin: &mut Pin) {
        self.hops = *msg;
        if self.id == 0 {
            *pin = Pin::Host;
        } else {
            self.holding = true;
            *pin = Pin::App(0);
        }
    }

    fn step(&mut self, _pin: &mut Pin) -> bool {
        false
    }

    fn finish(&mut self, _msg: &mut u32) -> bool {
        self.finished += 1;
        false
    }
}

fn ring(engine: &Engine, size: u32) -> PGraph<Ring, ()> {
    let mut graph: PGraph<Ring, ()> = PGraph::new(engine.top(), "ring", config(Discipline::Async));
    let devices: Vec<u32> = (0..size).map(|_| graph.new_device().unwrap()).collect();
    for (i, &dev) in devices.iter().enumerate() {
        graph
            .add_edge(dev, 0, devices[(i + 1) % devices.len()])
            .unwrap();
        let state = graph.state_mut(dev).unwrap();
        state.id = dev;
        state.holding = dev == 0;
    }
    graph
}

#[test]
fn token_travels_round_a_ring() {
    let mut engine = start_test(file!());
    let image = single_image(&mut ring(&engine, 4));
    let ops = Rc::new(Loopback::new(image.slot));
    let report = run::<Ring>(&mut engine, image, &ops);
    run_simulation!(engine);

    assert_eq!(ops.host_messages(), vec![(0, 4)]);
    let report = report.borrow_mut().take().unwrap();
    assert!(report.devices.iter().all(|d| d.state.finished == 1));
    assert_eq!(report.counters.msgs_recv, 4);
    // Four hops plus the report to the host.
    assert_eq!(report.counters.send_handler_calls, 5);
}

/// Adds up what it hears and keeps sending one each step until it has heard
/// ten.
#[derive(Clone, Default, Serialize, Deserialize)]
struct Counter {
    count: u32,
}

impl Device for Counter {
    type Edge = ();
    type Message = u32;

    fn init(&mut self, pin: &mut Pin) {
        *pin = Pin::App(0);
    }

    fn send(&mut self, msg: &mut u32, pin: &mut Pin) {
        *msg = 1;
        *pin = Pin::No;
    }

    fn recv(&mut self, msg: &u32, _edge: &(), _pin: &mut Pin) {
        self.count += msg;
    }

    fn step(&mut self, pin: &mut Pin) -> bool {
        if self.count < 10 {
            *pin = Pin::App(0);
        }
        self.count < 10
    }

    fn finish(&mut self, msg: &mut u32) -> bool {
        *msg = self.count;
        true
    }
}

#[test]
fn synchronized_pair_counts_ten_steps() {
    let mut engine = start_test(file!());
    let mut graph: PGraph<Counter, ()> =
        PGraph::new(engine.top(), "pair", config(Discipline::Sync));
    let a = graph.new_device().unwrap();
    let b = graph.new_device().unwrap();
    graph.add_edge(a, 0, b).unwrap();
    graph.add_edge(b, 0, a).unwrap();
    let image = single_image(&mut graph);

    let ops = Rc::new(Loopback::new(image.slot));
    let report = run::<Counter>(&mut engine, image, &ops);
    run_simulation!(engine);

    let mut host = ops.host_messages();
    host.sort();
    assert_eq!(host, vec![(0, 10), (1, 10)]);
    let report = report.borrow_mut().take().unwrap();
    assert!(report.devices.iter().all(|d| d.steps == 10));
    assert_eq!(report.counters.steps, 20);
}

#[test]
fn sync_edges_pace_one_way_links() {
    // a -> b only: b's reply on the sync edge keeps a from running ahead.
    let mut engine = start_test(file!());
    let mut graph: PGraph<Counter, ()> =
        PGraph::new(engine.top(), "chain", config(Discipline::Sync));
    let a = graph.new_device().unwrap();
    let b = graph.new_device().unwrap();
    graph.add_edge(a, 0, b).unwrap();
    graph.add_edge(a, 0, a).unwrap();
    let image = single_image(&mut graph);

    let ops = Rc::new(Loopback::new(image.slot));
    let report = run::<Counter>(&mut engine, image, &ops);
    run_simulation!(engine);

    let report = report.borrow_mut().take().unwrap();
    let steps: Vec<(u32, u32)> = report
        .devices
        .iter()
        .map(|d| (d.global_id, d.steps))
        .collect();
    assert_eq!(steps, vec![(0, 10), (1, 10)]);
    let mut host = ops.host_messages();
    host.sort();
    assert_eq!(host, vec![(0, 10), (1, 10)]);
}

/// Device 0 stops after its first step, the others keep going.
#[derive(Clone, Default, Serialize, Deserialize)]
struct Quitter {
    id: u32,
    steps: u32,
}

impl Device for Quitter {
    type Edge = ();
    type Message = u32;

    fn init(&mut self, pin: &mut Pin) {
        *pin = Pin::App(0);
    }

    fn send(&mut self, msg: &mut u32, pin: &mut Pin) {
        *msg = 1;
        *pin = Pin::No;
    }

    fn recv(&mut self, _msg: &u32, _edge: &(), _pin: &mut Pin) {}

    fn step(&mut self, pin: &mut Pin) -> bool {
        self.steps += 1;
        *pin = Pin::App(0);
        self.id != 0
    }

    fn finish(&mut self, msg: &mut u32) -> bool {
        *msg = self.steps;
        true
    }
}

#[test]
fn messages_for_retired_devices_are_counted() {
    let mut engine = start_test(file!());
    let mut graph: PGraph<Quitter, ()> =
        PGraph::new(engine.top(), "quit", config(Discipline::Sync));
    let a = graph.new_device().unwrap();
    let b = graph.new_device().unwrap();
    graph.state_mut(b).unwrap().id = b;
    graph.add_edge(a, 0, b).unwrap();
    graph.add_edge(b, 0, a).unwrap();
    let image = single_image(&mut graph);

    let ops = Rc::new(Loopback::new(image.slot));
    let report = run::<Quitter>(&mut engine, image, &ops);
    run_simulation!(engine);

    let report = report.borrow_mut().take().unwrap();
    // b's message for its second step finds a retired.
    assert_eq!(report.counters.dropped, 1);
    assert!(report.devices.iter().all(|d| d.steps == 1));
    let mut host = ops.host_messages();
    host.sort();
    assert_eq!(host, vec![(0, 1), (1, 1)]);
}

/// Asks for three more idle steps, then stops.
#[derive(Clone, Default, Serialize, Deserialize)]
struct Sleeper {
    steps: u32,
    finished: u32,
    heard: u32,
}

impl Device for Sleeper {
    type Edge = ();
    type Message = u32;

    fn init(&mut self, _pin: &mut Pin) {}

    fn send(&mut self, _msg: &mut u32, pin: &mut Pin) {
        *pin = Pin::No;
    }

    fn recv(&mut self, msg: &u32, _edge: &(), _pin: &mut Pin) {
        self.heard += msg;
    }

    fn step(&mut self, _pin: &mut Pin) -> bool {
        self.steps += 1;
        self.steps < 4
    }

    fn finish(&mut self, msg: &mut u32) -> bool {
        self.finished += 1;
        *msg = self.heard;
        true
    }
}

#[test]
fn idle_steps_until_no_device_is_active() {
    let mut engine = start_test(file!());
    let mut graph: PGraph<Sleeper, ()> =
        PGraph::new(engine.top(), "sleepers", config(Discipline::Async));
    for _ in 0..5 {
        graph.new_device().unwrap();
    }
    let image = single_image(&mut graph);

    let ops = Rc::new(Loopback::new(image.slot));
    let report = run::<Sleeper>(&mut engine, image, &ops);
    run_simulation!(engine);

    let report = report.borrow_mut().take().unwrap();
    assert_eq!(report.devices.len(), 5);
    for device in &report.devices {
        assert_eq!(device.steps, 4);
        assert_eq!(device.state.finished, 1);
    }
    assert_eq!(ops.host_messages().len(), 5);
}

#[test]
fn host_messages_reach_devices() {
    let mut engine = start_test(file!());
    let mut graph: PGraph<Sleeper, ()> =
        PGraph::new(engine.top(), "sleepers", config(Discipline::Async));
    graph.new_device().unwrap();
    graph.new_device().unwrap();
    let image = single_image(&mut graph);

    let ops = Rc::new(Loopback::new(image.slot));
    let header = MsgHeader {
        device: 1,
        edge: NO_EDGE,
        stamp: 0,
        flags: FLAG_HOST,
    };
    ops.inbox
        .borrow_mut()
        .push_back(header.frame(&42u32.to_le_bytes()));
    run::<Sleeper>(&mut engine, image, &ops);
    run_simulation!(engine);

    assert_eq!(ops.host_messages(), vec![(0, 0), (1, 42)]);
}

#[test]
fn short_payload_is_rejected() {
    let mut engine = start_test(file!());
    let mut graph: PGraph<Sleeper, ()> =
        PGraph::new(engine.top(), "sleepers", config(Discipline::Async));
    graph.new_device().unwrap();
    let image = single_image(&mut graph);

    let ops = Rc::new(Loopback::new(image.slot));
    let header = MsgHeader {
        device: 0,
        edge: NO_EDGE,
        stamp: 0,
        flags: FLAG_HOST,
    };
    ops.inbox.borrow_mut().push_back(header.frame(&[1, 2]));
    run::<Sleeper>(&mut engine, image, &ops);
    run_simulation!(
        engine,
        "Error: top::slot_0x0000: received 2 byte payload, expected 4"
    );
}
