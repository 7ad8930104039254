// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! One run of the hop-distance application.
//!
//! Builds the graph, maps it, runs it on the configured backend and returns
//! the statistics of the run as `name:value` pairs.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use mesh_config::ConfigError;
use mesh_config::run_config::RunConfig;
use mesh_config::settings::{BackendKind, Discipline};
use mesh_engine::sim_error;
use mesh_engine::types::{SimError, SimResult};
use mesh_graph::edge_list::EdgeList;
use mesh_hostlink::backend::Backend;
use mesh_hostlink::counters::PerfCounterAccumulator;
use mesh_hostlink::hostlink::HostLink;
use mesh_hostlink::memfile::MemFile;
use mesh_mapper::pgraph::{MapperConfig, PGraph};
use mesh_runtime::counters::ThreadCounter;
use mesh_runtime::message::payload_bytes;
use mesh_sim::TrackerFactory;
use mesh_sim::emulator::FabricBackend;
use mesh_sim::soft::SoftSim;
use mesh_track::entity::Entity;
use mesh_track::info;

use crate::hops::{HopDistance, UNREACHED};
use crate::network::{HopGraph, add_edge_list, add_grid};

/// One line of the run's output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stat {
    pub name: &'static str,
    pub value: u64,
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

#[must_use]
pub fn find(stats: &[Stat], name: &str) -> Option<u64> {
    stats.iter().find(|s| s.name == name).map(|s| s.value)
}

#[derive(Default)]
struct Stats(Vec<Stat>);

impl Stats {
    fn add(&mut self, name: &'static str, value: impl TryInto<u64>) {
        let value = value.try_into().unwrap_or(u64::MAX);
        self.0.push(Stat { name, value });
    }
}

fn config_error(e: ConfigError) -> SimError {
    SimError(e.to_string())
}

/// Run the application described by `config`. `worker` builds the trackers
/// of the backend's worker thread.
pub fn run(
    parent: &Rc<Entity>,
    config: &RunConfig,
    worker: TrackerFactory,
) -> Result<Vec<Stat>, SimError> {
    let entity = Rc::new(Entity::new(parent, "run"));
    let dims = config.dims().map_err(config_error)?;
    let placer = config.placer().map_err(config_error)?;
    let sim = config.sim().map_err(config_error)?;
    let discipline = config.discipline();
    let backend = config.backend();
    if backend == BackendKind::Soft && discipline == Discipline::Sync {
        return sim_error!(format!(
            "{entity}: the soft backend only runs the asynchronous discipline"
        ));
    }

    let mut graph: HopGraph = PGraph::new(
        &entity,
        "hops",
        MapperConfig {
            dims,
            placer,
            discipline,
            num_pins: 1,
            message_bytes: payload_bytes::<u32>()?,
        },
    );
    match config.edges_file() {
        Some(path) => {
            let list = EdgeList::read(path)?;
            info!(entity ; "{}: {} nodes, max fan-out {}",
                path.display(), list.num_nodes, list.max_fan_out());
            add_edge_list(&mut graph, &list)?;
        }
        None => add_grid(&mut graph, config.grid_size.unwrap_or(16))?,
    }

    let num_devices = graph.graph().num_devices();
    let source = config.source.unwrap_or(0);
    if source >= num_devices {
        return sim_error!(format!(
            "{entity}: source {source} is not one of the {num_devices} devices"
        ));
    }
    let rounds = match discipline {
        Discipline::Async => 1,
        Discipline::Sync => config.max_steps.unwrap_or(64),
    };
    for dev in 0..num_devices {
        if let Some(state) = graph.state_mut(dev) {
            *state = HopDistance::with_rounds(rounds);
        }
    }

    let mut stats = Stats::default();
    stats.add("devices", num_devices);
    stats.add("edges", graph.graph().num_edges());
    stats.add("max_fan_out", graph.graph().max_fan_out());
    stats.add("max_fan_in", graph.graph().max_fan_in());

    graph.map()?;
    let Some(mapping) = graph.mapping() else {
        return sim_error!(format!("{entity}: graph was not mapped"));
    };
    stats.add("slots_used", mapping.slots().count());
    stats.add("cut_edges", mapping.placement().cut_edges(graph.graph()));
    let Some(start) = mapping.addr_of(source) else {
        return sim_error!(format!("{entity}: source {source} was not placed"));
    };
    let code = read_memfile(config.code_file())?;
    let data = read_memfile(config.data_file())?;
    stats.add("code_bytes", code.num_bytes());
    stats.add("data_bytes", data.num_bytes());

    match backend {
        BackendKind::Fabric => {
            let fabric = FabricBackend::<HopDistance>::new(&entity, dims, sim, worker)?;
            let mut host = HostLink::new(&entity, fabric);
            let mut images = graph.heap_images()?;
            images.extend(graph.router_images()?);
            host.load_program(&code, &data)?;
            host.boot(&images)?;
            host.send_to_device(start, &0u32)?;
            host.go()?;
            collect_distances(&entity, &mut host, num_devices, &mut stats)?;

            let mut acc = PerfCounterAccumulator::new(&dims);
            host.collect_counters(&mut acc)?;
            stats.add("msgs_sent", acc.total(ThreadCounter::MsgsSent));
            stats.add("msgs_recv", acc.total(ThreadCounter::MsgsRecv));
            stats.add("blocked_sends", acc.total(ThreadCounter::BlockedSends));
            stats.add("ticks", host.backend_mut().wait()?.ticks);
        }
        BackendKind::Soft => {
            let mut host = HostLink::new(&entity, SoftSim::new(&entity, &graph, sim, worker)?);
            host.load_program(&code, &data)?;
            host.boot(&[])?;
            host.send_to_device(start, &0u32)?;
            host.go()?;
            collect_distances(&entity, &mut host, num_devices, &mut stats)?;

            let soft = host.backend_mut().stats()?;
            stats.add("msgs_sent", soft.sent);
            stats.add("msgs_recv", soft.received);
            stats.add("max_skew", soft.max_skew);
            stats.add("ticks", soft.ticks);
        }
    }
    Ok(stats.0)
}

fn read_memfile(path: Option<&std::path::Path>) -> Result<MemFile, SimError> {
    match path {
        Some(path) => MemFile::read(path),
        None => Ok(MemFile::default()),
    }
}

/// Take the final distance of every device from the host queue.
fn collect_distances<B: Backend>(
    entity: &Rc<Entity>,
    host: &mut HostLink<B>,
    num_devices: u32,
    stats: &mut Stats,
) -> SimResult {
    let mut dists = BTreeMap::new();
    while let Some(msg) = host.recv_msg::<u32>()? {
        if dists.insert(msg.device, msg.msg).is_some() {
            return sim_error!(format!("{entity}: device {} reported twice", msg.device));
        }
    }
    if dists.len() != num_devices as usize {
        return sim_error!(format!(
            "{entity}: {} of {num_devices} devices reported",
            dists.len()
        ));
    }

    let reached: Vec<u64> = dists
        .values()
        .filter(|&&d| d != UNREACHED)
        .map(|&d| u64::from(d))
        .collect();
    info!(entity ; "{} of {num_devices} devices reached", reached.len());
    stats.add("reached", reached.len());
    stats.add("sum_of_distances", reached.iter().sum::<u64>());
    stats.add("max_distance", reached.iter().copied().max().unwrap_or(0));
    Ok(())
}
