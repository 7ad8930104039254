// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A software simulator that runs a graph's devices directly.
//!
//! No placement, no heap images and no slots: the simulator steps through
//! the devices of the graph itself. On every step each device that is ready
//! to send is picked with probability one half, and the oldest bucket of
//! in-flight messages is delivered. Message latencies are drawn as on the
//! [fabric](crate::fabric), but no ordering is kept between any pair of
//! devices. A step on which no device is ready and nothing is in flight is
//! idle: every device steps, and once none of them wants to continue every
//! device finishes.
//!
//! This is the asynchronous discipline only. It exists to check device logic
//! and termination without the mapper in the way.
//!
//! Host messages sent while the simulation runs join the bucket delivered on
//! the next step.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use mesh_config::settings::SimConfig;
use mesh_engine::sim_error;
use mesh_engine::types::{SimError, SimResult};
use mesh_graph::address::SlotAddress;
use mesh_graph::graph::DeviceId;
use mesh_hostlink::backend::Backend;
use mesh_hostlink::queue::HostQueue;
use mesh_mapper::image::HeapImage;
use mesh_mapper::pgraph::PGraph;
use mesh_runtime::device::{Device, Pin};
use mesh_runtime::interp::DeviceOutcome;
use mesh_runtime::message::{FLAG_HOST, MsgHeader, NO_EDGE, decode_payload, encode_payload};
use mesh_track::entity::{Entity, toplevel};
use mesh_track::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::TrackerFactory;
use crate::delay::Latency;

/// Statistics of a software run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SoftStats {
    /// Simulation steps taken.
    pub ticks: u64,

    /// Idle steps, each of which called `step` on every device.
    pub idle_steps: u32,
    pub sent: u64,
    pub received: u64,
    pub max_in_flight: u64,

    /// Largest number of steps any message spent in flight.
    pub max_skew: u64,
}

#[derive(Clone, Debug)]
pub struct SoftOutcome<D> {
    pub devices: Vec<DeviceOutcome<D>>,
    pub stats: SoftStats,
}

/// The parts of a graph the worker needs.
struct Network<D: Device> {
    states: Vec<D>,
    labels: Vec<D::Edge>,

    /// `(to, edge)` per pin per device.
    outgoing: Vec<Vec<Vec<(DeviceId, usize)>>>,
}

pub struct SoftSim<D: Device> {
    pub entity: Rc<Entity>,
    config: SimConfig,
    tracker: TrackerFactory,
    network: Option<Network<D>>,

    /// Device of each `(slot, local)` address, if the graph was mapped.
    addresses: HashMap<(u32, u16), DeviceId>,
    pending: Vec<(DeviceId, Vec<u8>)>,
    queue: HostQueue,

    /// Messages for the running simulation, once `go` has started it.
    host_out: Option<Sender<(DeviceId, Vec<u8>)>>,
    worker: Option<JoinHandle<Result<SoftOutcome<D>, SimError>>>,
    outcome: Option<SoftOutcome<D>>,
}

impl<D> SoftSim<D>
where
    D: Device + Send,
    D::Edge: Send,
{
    /// Take a copy of the devices and edges of `graph`. Host messages can
    /// only be addressed if the graph has been mapped.
    pub fn new(
        parent: &Rc<Entity>,
        graph: &PGraph<D, D::Edge>,
        config: SimConfig,
        tracker: TrackerFactory,
    ) -> Result<Self, SimError> {
        let entity = Rc::new(Entity::new(parent, "soft"));
        Latency::new(&config).map_err(|e| SimError(format!("{entity}: {}", e.0)))?;

        let edges = graph.graph();
        let num_devices = edges.num_devices();
        let num_pins = edges.num_pins() as usize;
        let mut states = Vec::with_capacity(num_devices as usize);
        let mut outgoing = vec![vec![Vec::new(); num_pins]; num_devices as usize];
        let mut labels = Vec::with_capacity(edges.num_edges());
        for dev in 0..num_devices {
            match graph.state(dev) {
                Some(state) => states.push(state.clone()),
                None => return sim_error!(format!("{entity}: device {dev} has no state")),
            }
        }
        for (index, edge) in edges.edges().iter().enumerate() {
            outgoing[edge.from as usize][edge.pin as usize].push((edge.to, index));
            labels.push(edge.label.clone());
        }

        let mut addresses = HashMap::new();
        if let Some(mapping) = graph.mapping() {
            for dev in 0..num_devices {
                if let Some(addr) = mapping.addr_of(dev) {
                    addresses.insert((addr.slot.encode()?, addr.local), dev);
                }
            }
        }
        debug!(entity ; "{num_devices} devices, {} edges", labels.len());

        Ok(Self {
            entity,
            config,
            tracker,
            network: Some(Network {
                states,
                labels,
                outgoing,
            }),
            addresses,
            pending: Vec::new(),
            queue: HostQueue::new(),
            host_out: None,
            worker: None,
            outcome: None,
        })
    }

    /// Wait for the run to end.
    pub fn wait(&mut self) -> Result<&SoftOutcome<D>, SimError> {
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(result) => self.outcome = Some(result?),
                Err(_) => return sim_error!(format!("{}: worker panicked", self.entity)),
            }
        }
        match &self.outcome {
            Some(outcome) => Ok(outcome),
            None => sim_error!(format!("{}: not started", self.entity)),
        }
    }

    pub fn stats(&mut self) -> Result<SoftStats, SimError> {
        Ok(self.wait()?.stats)
    }
}

impl<D> Backend for SoftSim<D>
where
    D: Device + Send,
    D::Edge: Send,
{
    fn boot(&mut self, images: &[HeapImage]) -> SimResult {
        debug!(self.entity ; "running the graph directly, {} images unused", images.len());
        Ok(())
    }

    fn go(&mut self) -> SimResult {
        let Some(network) = self.network.take() else {
            return sim_error!(format!("{}: already started", self.entity));
        };
        let config = self.config;
        let tracker = self.tracker.clone();
        let pending = std::mem::take(&mut self.pending);
        let queue = self.queue.clone();
        let (host_out, host_in) = mpsc::channel();
        self.host_out = Some(host_out);
        let handle = thread::Builder::new()
            .name("soft-sim".to_string())
            .spawn(move || {
                let result = run_soft(network, config, &tracker, pending, host_in, &queue);
                match &result {
                    Ok(_) => queue.finish()?,
                    Err(e) => queue.fail(e.clone())?,
                }
                result
            })
            .map_err(|e| SimError(format!("{}: cannot start worker: {e}", self.entity)))?;
        self.worker = Some(handle);
        Ok(())
    }

    fn send(&mut self, slot: SlotAddress, msg: &[u8]) -> SimResult {
        let (header, payload) = MsgHeader::parse(msg)?;
        let id = slot.encode()?;
        let dev = u16::try_from(header.device)
            .ok()
            .and_then(|local| self.addresses.get(&(id, local)));
        let Some(&dev) = dev else {
            return sim_error!(format!(
                "{}: no device {} on {slot}",
                self.entity, header.device
            ));
        };
        let Some(host_out) = &self.host_out else {
            self.pending.push((dev, payload.to_vec()));
            return Ok(());
        };
        if host_out.send((dev, payload.to_vec())).is_err() {
            return sim_error!(format!(
                "{}: message for {slot} after the simulation finished",
                self.entity
            ));
        }
        Ok(())
    }

    fn queue(&self) -> &HostQueue {
        &self.queue
    }

    fn counter_lines(&mut self) -> Result<Vec<(u32, String)>, SimError> {
        let stats = self.wait()?.stats;
        info!(self.entity ; "{stats:?}");
        Ok(Vec::new())
    }
}

struct Transit<M> {
    to: DeviceId,

    /// `None` for messages from the host.
    edge: Option<usize>,
    sent_at: u64,
    msg: M,
}

struct World<'a, D: Device> {
    entity: Rc<Entity>,
    network: Network<D>,
    pins: Vec<Pin>,
    steps: Vec<u32>,
    in_flight: VecDeque<Vec<Transit<D::Message>>>,
    num_in_flight: u64,
    no_edge: D::Edge,
    latency: Latency,
    rng: StdRng,
    stats: SoftStats,
    next_report: u64,
    host: &'a HostQueue,
    host_in: Receiver<(DeviceId, Vec<u8>)>,
}

impl<D: Device> World<'_, D> {
    fn post(&mut self, to: DeviceId, edge: Option<usize>, msg: D::Message) {
        let distance = self.latency.sample(&mut self.rng) as usize;
        while self.in_flight.len() <= distance {
            self.in_flight.push_back(Vec::new());
        }
        self.in_flight[distance].push(Transit {
            to,
            edge,
            sent_at: self.stats.ticks,
            msg,
        });
        self.num_in_flight += 1;
        self.stats.max_in_flight = self.stats.max_in_flight.max(self.num_in_flight);
    }

    fn to_host(&self, dev: usize, msg: &D::Message) -> SimResult {
        let header = MsgHeader {
            device: dev as u32,
            edge: NO_EDGE,
            stamp: self.steps[dev],
            flags: FLAG_HOST,
        };
        self.host.push(header.frame(&encode_payload(msg)?))
    }

    fn send(&mut self, dev: usize) -> SimResult {
        let pin = self.pins[dev];
        let mut msg = D::Message::default();
        self.network.states[dev].send(&mut msg, &mut self.pins[dev]);
        match pin {
            Pin::No => Ok(()),
            Pin::Host => self.to_host(dev, &msg),
            Pin::App(n) => {
                let Some(targets) = self.network.outgoing[dev].get(usize::from(n)) else {
                    return sim_error!(format!(
                        "{}: device {dev} cannot send on {pin}",
                        self.entity
                    ));
                };
                let targets = targets.clone();
                for (to, edge) in targets {
                    self.post(to, Some(edge), msg.clone());
                    self.stats.sent += 1;
                }
                Ok(())
            }
        }
    }

    /// Put a message from the host in the bucket delivered next.
    fn post_from_host(&mut self, to: DeviceId, payload: &[u8]) -> SimResult {
        let msg = decode_payload(payload)?;
        if self.in_flight.is_empty() {
            self.in_flight.push_back(Vec::new());
        }
        self.in_flight[0].push(Transit {
            to,
            edge: None,
            sent_at: self.stats.ticks,
            msg,
        });
        self.num_in_flight += 1;
        Ok(())
    }

    fn deliver(&mut self, transit: Transit<D::Message>) {
        let to = transit.to as usize;
        let label = match transit.edge {
            Some(edge) => &self.network.labels[edge],
            None => &self.no_edge,
        };
        self.network.states[to].recv(&transit.msg, label, &mut self.pins[to]);
        self.stats.received += 1;
        self.stats.max_skew = self.stats.max_skew.max(self.stats.ticks - transit.sent_at);
    }

    /// Advance one step. Returns false once every device has finished.
    fn step(&mut self) -> Result<bool, SimError> {
        if self.stats.ticks >= self.next_report {
            debug!(self.entity ; "tick {}: sent {}, received {}, in flight {}, max skew {}",
                self.stats.ticks, self.stats.sent, self.stats.received,
                self.num_in_flight, self.stats.max_skew);
            self.next_report = self.next_report * 4 / 3;
        }

        while let Ok((to, payload)) = self.host_in.try_recv() {
            self.post_from_host(to, &payload)?;
        }

        let mut idle = true;
        for dev in 0..self.pins.len() {
            if self.pins[dev].is_ready() {
                idle = false;
                if self.rng.r#gen::<bool>() {
                    self.send(dev)?;
                }
            }
        }

        if let Some(bucket) = self.in_flight.pop_front() {
            idle = false;
            self.num_in_flight -= bucket.len() as u64;
            for transit in bucket {
                self.deliver(transit);
            }
        }
        self.stats.ticks += 1;
        if !idle {
            return Ok(true);
        }

        let mut active = false;
        for dev in 0..self.pins.len() {
            active |= self.network.states[dev].step(&mut self.pins[dev]);
            self.steps[dev] += 1;
        }
        self.stats.idle_steps += 1;
        if active {
            return Ok(true);
        }

        for dev in 0..self.pins.len() {
            let mut msg = D::Message::default();
            if self.network.states[dev].finish(&mut msg) {
                self.to_host(dev, &msg)?;
            }
        }
        Ok(false)
    }
}

fn run_soft<D: Device>(
    network: Network<D>,
    config: SimConfig,
    tracker: &TrackerFactory,
    pending: Vec<(DeviceId, Vec<u8>)>,
    host_in: Receiver<(DeviceId, Vec<u8>)>,
    host: &HostQueue,
) -> Result<SoftOutcome<D>, SimError> {
    let tracker = tracker();
    let top = toplevel(&tracker, "top");
    let entity = Rc::new(Entity::new(&top, "soft"));
    let num_devices = network.states.len();
    let mut world = World {
        entity,
        network,
        pins: vec![Pin::No; num_devices],
        steps: vec![0; num_devices],
        in_flight: VecDeque::new(),
        num_in_flight: 0,
        no_edge: D::Edge::default(),
        latency: Latency::new(&config)?,
        rng: StdRng::seed_from_u64(config.seed),
        stats: SoftStats::default(),
        next_report: 10_000,
        host,
        host_in,
    };

    for (state, pin) in world.network.states.iter_mut().zip(world.pins.iter_mut()) {
        state.init(pin);
    }
    for (to, payload) in pending {
        world.post_from_host(to, &payload)?;
    }

    while world.step()? {}
    drop(world.host_in);
    info!(world.entity ; "finished: {:?}", world.stats);

    let devices = world
        .network
        .states
        .into_iter()
        .zip(world.steps)
        .enumerate()
        .map(|(dev, (state, steps))| DeviceOutcome {
            global_id: dev as u32,
            state,
            steps,
        })
        .collect();
    Ok(SoftOutcome {
        devices,
        stats: world.stats,
    })
}
