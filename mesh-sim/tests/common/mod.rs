// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Devices and mesh shapes shared by the backend tests.

#![allow(dead_code)]

use std::sync::Arc;

use mesh_config::settings::{Discipline, MeshDims, PlacerConfig, PlacerMethod, SimConfig};
use mesh_mapper::pgraph::{MapperConfig, PGraph};
use mesh_runtime::device::{Device, Pin};
use mesh_runtime::message::payload_bytes;
use mesh_sim::TrackerFactory;
use mesh_track::tracker::dev_null_tracker;
use serde::{Deserialize, Serialize};

/// One board, one mailbox, one core of `threads` threads.
pub fn one_core(threads: u32) -> MeshDims {
    MeshDims {
        mailboxes_x: 1,
        mailboxes_y: 1,
        cores_per_mailbox: 1,
        threads_per_core: threads,
        log_bytes_per_partition: 17,
        ..MeshDims::default()
    }
}

/// Devices are placed in id order, one per slot while slots last.
pub fn mapper(dims: MeshDims, discipline: Discipline) -> MapperConfig {
    MapperConfig {
        dims,
        placer: PlacerConfig {
            method: PlacerMethod::Direct,
            ..PlacerConfig::default()
        },
        discipline,
        num_pins: 1,
        message_bytes: payload_bytes::<u32>().unwrap(),
    }
}

pub fn sim(seed: u64, out_of_order: bool) -> SimConfig {
    SimConfig {
        seed,
        deliver_out_of_order: out_of_order,
        ..SimConfig::default()
    }
}

pub fn quiet() -> TrackerFactory {
    Arc::new(dev_null_tracker)
}

/// Sends one each step until it has heard ten, then reports its count.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Counter {
    pub count: u32,
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

/// Edge label of ring edges. Messages from the host carry the default
/// label.
pub const RING_EDGE: u8 = 1;

/// Passes a hop count around a ring. The host starts it at device 0, which
/// reports the count once it comes back.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Token {
    pub id: u32,
    pub hops: u32,
    pub finished: u32,
}

impl Device for Token {
    type Edge = u8;
    type Message = u32;

    fn init(&mut self, _pin: &mut Pin) {}

    fn send(&mut self, msg: &mut u32, pin: &mut Pin) {
        *msg = if *pin == Pin::Host {
            self.hops
        } else {
            self.hops + 1
        };
        *pin = Pin::No;
    }

    fn recv(&mut self, msg: &u32, edge: &u8, pin: &mut Pin) {
        self.hops = *msg;
        *pin = if *edge == RING_EDGE && self.id == 0 {
            Pin::Host
        } else {
            Pin::App(0)
        };
    }

    fn step(&mut self, _pin: &mut Pin) -> bool {
        false
    }

    fn finish(&mut self, _msg: &mut u32) -> bool {
        self.finished += 1;
        false
    }
}

pub fn ring(graph: &mut PGraph<Token, u8>, size: u32) {
    let devices: Vec<u32> = (0..size).map(|_| graph.new_device().unwrap()).collect();
    for (i, &dev) in devices.iter().enumerate() {
        let next = devices[(i + 1) % devices.len()];
        graph.add_labelled_edge(RING_EDGE, dev, 0, next).unwrap();
        graph.state_mut(dev).unwrap().id = dev;
    }
}

/// Asks for three more idle steps, then reports how often it finished.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Sleeper {
    pub steps: u32,
    pub finished: u32,
}

impl Device for Sleeper {
    type Edge = ();
    type Message = u32;

    fn init(&mut self, _pin: &mut Pin) {}

    fn send(&mut self, _msg: &mut u32, pin: &mut Pin) {
        *pin = Pin::No;
    }

    fn recv(&mut self, _msg: &u32, _edge: &(), _pin: &mut Pin) {}

    fn step(&mut self, _pin: &mut Pin) -> bool {
        self.steps += 1;
        self.steps < 4
    }

    fn finish(&mut self, msg: &mut u32) -> bool {
        self.finished += 1;
        *msg = self.finished;
        true
    }
}

/// Sends its id to its neighbours once and adds up what it hears.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Gossip {
    pub id: u32,
    pub sum: u32,
}

impl Device for Gossip {
    type Edge = ();
    type Message = u32;

    fn init(&mut self, pin: &mut Pin) {
        *pin = Pin::App(0);
    }

    fn send(&mut self, msg: &mut u32, pin: &mut Pin) {
        *msg = self.id;
        *pin = Pin::No;
    }

    fn recv(&mut self, msg: &u32, _edge: &(), _pin: &mut Pin) {
        self.sum += msg;
    }

    fn step(&mut self, _pin: &mut Pin) -> bool {
        false
    }

    fn finish(&mut self, msg: &mut u32) -> bool {
        *msg = self.sum;
        true
    }
}

/// Every device of a `size` clique hears the ids of all the others.
pub fn clique(graph: &mut PGraph<Gossip, ()>, size: u32) {
    let devices: Vec<u32> = (0..size).map(|_| graph.new_device().unwrap()).collect();
    for &from in &devices {
        graph.state_mut(from).unwrap().id = from;
        for &to in &devices {
            if from != to {
                graph.add_edge(from, 0, to).unwrap();
            }
        }
    }
}

/// Host messages a [`Ping`] answers before it lets the mesh stop.
pub const PINGS: u32 = 2;

/// Answers every host message with twice its value. Keeps the mesh running
/// until it has answered [`PINGS`] of them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Ping {
    pub heard: u32,
    pub last: u32,
}

impl Device for Ping {
    type Edge = ();
    type Message = u32;

    fn init(&mut self, _pin: &mut Pin) {}

    fn send(&mut self, msg: &mut u32, pin: &mut Pin) {
        *msg = self.last * 2;
        *pin = Pin::No;
    }

    fn recv(&mut self, msg: &u32, _edge: &(), pin: &mut Pin) {
        self.heard += 1;
        self.last = *msg;
        *pin = Pin::Host;
    }

    fn step(&mut self, _pin: &mut Pin) -> bool {
        self.heard < PINGS
    }

    fn finish(&mut self, _msg: &mut u32) -> bool {
        false
    }
}

/// A message that fills the whole payload.
pub type Wide = [u64; 6];

pub const WIDE: Wide = [
    0x0102_0304_0506_0708,
    0x1112_1314_1516_1718,
    0x2122_2324_2526_2728,
    0x3132_3334_3536_3738,
    0x4142_4344_4546_4748,
    0xf1f2_f3f4_f5f6_f7f8,
];

/// Device 0 sends [`WIDE`] once on pin 1. Whoever hears it keeps the
/// payload and the edge label and reports the payload at the end.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WideSender {
    pub id: u32,
    pub got: Wide,
    pub label: u8,
    pub heard: u32,
}

impl Device for WideSender {
    type Edge = u8;
    type Message = Wide;

    fn init(&mut self, pin: &mut Pin) {
        if self.id == 0 {
            *pin = Pin::App(1);
        }
    }

    fn send(&mut self, msg: &mut Wide, pin: &mut Pin) {
        *msg = WIDE;
        *pin = Pin::No;
    }

    fn recv(&mut self, msg: &Wide, edge: &u8, _pin: &mut Pin) {
        self.got = *msg;
        self.label = *edge;
        self.heard += 1;
    }

    fn step(&mut self, _pin: &mut Pin) -> bool {
        false
    }

    fn finish(&mut self, msg: &mut Wide) -> bool {
        *msg = self.got;
        self.heard > 0
    }
}
