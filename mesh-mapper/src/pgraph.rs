// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A graph of devices with state, mapped once onto the slots of a mesh.
//!
//! `map()` places the graph, gives every device a slot-local index and every
//! edge a key into its destination slot's incoming edge table, and builds the
//! programmable router tables. Device states may still be changed after
//! mapping; they are captured when [`PGraph::heap_images`] is called.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::rc::Rc;

use mesh_config::settings::{CORES_PER_DRAM, Discipline, MeshDims, PlacerConfig};
use mesh_engine::sim_error;
use mesh_engine::types::SimError;
use mesh_graph::address::{MAILBOX_SHIFT, SlotAddress};
use mesh_graph::graph::{DeviceId, Graph};
use mesh_graph::placer::{Placement, Placer};
use mesh_track::entity::Entity;
use mesh_track::{debug, info};
use serde::Serialize;

use crate::image::{ArenaDevice, ArenaPin, HeapImage, SlotArena};
use crate::layout::{MAX_PAYLOAD_BYTES, MAX_SLOT_ENTRIES, Neighbour, STACK_BYTES, SYNC_ENTRY};
use crate::routing::{ProgRouterMesh, ROUTER_TABLE_BASE, RoutingDest};

#[derive(Clone, Copy, Debug)]
pub struct MapperConfig {
    pub dims: MeshDims,
    pub placer: PlacerConfig,
    pub discipline: Discipline,

    /// Application pins per device.
    pub num_pins: u32,

    /// Payload bytes of the devices' messages.
    pub message_bytes: u32,
}

/// Where a device lives once mapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceAddr {
    pub slot: SlotAddress,
    pub local: u16,
}

/// A directed connection in a pin table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Link {
    from: DeviceId,
    entry: u32,
    to: DeviceId,

    /// Index of the application edge, `None` for sync edges.
    edge: Option<usize>,
}

/// The result of mapping a graph.
#[derive(Debug)]
pub struct Mapping {
    placement: Placement,
    addr_of: Vec<DeviceAddr>,
    links: Vec<Link>,

    /// Incoming edge key of each link.
    keys: Vec<u16>,

    /// Links leaving each device, in pin table order.
    outgoing: Vec<Vec<usize>>,

    /// Number of links arriving at each device.
    num_in: Vec<u32>,

    /// Links in each slot's incoming edge table, in key order.
    in_tables: BTreeMap<SlotAddress, Vec<usize>>,

    router: ProgRouterMesh,
    route_keys: HashMap<(DeviceId, u32), u32>,
}

impl Mapping {
    #[must_use]
    pub fn addr_of(&self, dev: DeviceId) -> Option<DeviceAddr> {
        self.addr_of.get(dev as usize).copied()
    }

    #[must_use]
    pub fn devices_on(&self, slot: &SlotAddress) -> &[DeviceId] {
        self.placement.devices_on(slot)
    }

    /// Occupied slots in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = &SlotAddress> {
        self.placement.slots()
    }

    #[must_use]
    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    /// Incoming edge key of application edge `edge`.
    #[must_use]
    pub fn in_edge_key(&self, edge: usize) -> Option<u16> {
        self.links
            .iter()
            .position(|l| l.edge == Some(edge))
            .map(|i| self.keys[i])
    }

    /// Sync edges added for the synchronized discipline, as `(from, to)`.
    #[must_use]
    pub fn sync_edges(&self) -> Vec<(DeviceId, DeviceId)> {
        self.links
            .iter()
            .filter(|l| l.edge.is_none())
            .map(|l| (l.from, l.to))
            .collect()
    }

    /// Incoming edges of `dev`, sync edges included.
    #[must_use]
    pub fn num_in(&self, dev: DeviceId) -> u32 {
        self.num_in.get(dev as usize).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn router(&self) -> &ProgRouterMesh {
        &self.router
    }

    /// Router key of the records reaching the destinations of a pin entry.
    #[must_use]
    pub fn route_key(&self, dev: DeviceId, entry: u32) -> Option<u32> {
        self.route_keys.get(&(dev, entry)).copied()
    }
}

pub struct PGraph<S, E> {
    pub entity: Rc<Entity>,
    graph: Graph<E>,
    states: Vec<S>,
    config: MapperConfig,
    mapping: Option<Mapping>,
}

impl<S, E> PGraph<S, E>
where
    S: Serialize + Default,
    E: Serialize + Default,
{
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str, config: MapperConfig) -> Self {
        let entity = Rc::new(Entity::new(parent, name));
        let graph = Graph::new(&entity, "graph", config.num_pins);
        Self {
            entity,
            graph,
            states: Vec::new(),
            config,
            mapping: None,
        }
    }

    fn check_unmapped(&self) -> Result<(), SimError> {
        if self.mapping.is_some() {
            return sim_error!(format!("{}: graph already mapped", self.entity));
        }
        Ok(())
    }

    pub fn new_device(&mut self) -> Result<DeviceId, SimError> {
        self.check_unmapped()?;
        self.states.push(S::default());
        Ok(self.graph.new_device())
    }

    pub fn add_edge(&mut self, from: DeviceId, pin: u32, to: DeviceId) -> Result<(), SimError> {
        self.check_unmapped()?;
        self.graph.add_edge(from, pin, to)
    }

    pub fn add_labelled_edge(
        &mut self,
        label: E,
        from: DeviceId,
        pin: u32,
        to: DeviceId,
    ) -> Result<(), SimError> {
        self.check_unmapped()?;
        self.graph.add_labelled_edge(label, from, pin, to)
    }

    #[must_use]
    pub fn graph(&self) -> &Graph<E> {
        &self.graph
    }

    #[must_use]
    pub fn state(&self, dev: DeviceId) -> Option<&S> {
        self.states.get(dev as usize)
    }

    pub fn state_mut(&mut self, dev: DeviceId) -> Option<&mut S> {
        self.states.get_mut(dev as usize)
    }

    #[must_use]
    pub fn mapping(&self) -> Option<&Mapping> {
        self.mapping.as_ref()
    }

    /// Place the graph and resolve every edge. May only be called once.
    pub fn map(&mut self) -> Result<&Mapping, SimError> {
        if self.mapping.is_some() {
            return sim_error!(format!("{}: map() called twice", self.entity));
        }
        if self.config.message_bytes > MAX_PAYLOAD_BYTES {
            return sim_error!(format!(
                "{}: messages of {} bytes exceed the {MAX_PAYLOAD_BYTES} byte payload",
                self.entity, self.config.message_bytes
            ));
        }

        let mut links: Vec<Link> = self
            .graph
            .edges()
            .iter()
            .enumerate()
            .map(|(i, e)| Link {
                from: e.from,
                entry: e.pin + 1,
                to: e.to,
                edge: Some(i),
            })
            .collect();
        if self.config.discipline == Discipline::Sync {
            links.extend(self.sync_links());
        }

        let placement = Placer::new(&self.entity, self.config.dims, self.config.placer)
            .place(&self.graph)?;

        let num_devices = self.graph.num_devices() as usize;
        let mut addr_of = vec![
            DeviceAddr {
                slot: SlotAddress::default(),
                local: 0,
            };
            num_devices
        ];
        for slot in placement.slots() {
            let devices = placement.devices_on(slot);
            if devices.len() > MAX_SLOT_ENTRIES {
                return sim_error!(format!(
                    "{}: {} devices on {slot}, at most {MAX_SLOT_ENTRIES} allowed",
                    self.entity,
                    devices.len()
                ));
            }
            for (local, &dev) in devices.iter().enumerate() {
                addr_of[dev as usize] = DeviceAddr {
                    slot: *slot,
                    local: local as u16,
                };
            }
        }

        let mut outgoing = vec![Vec::new(); num_devices];
        let mut incoming = vec![Vec::new(); num_devices];
        for (i, link) in links.iter().enumerate() {
            outgoing[link.from as usize].push(i);
            incoming[link.to as usize].push(i);
        }
        for out in &mut outgoing {
            out.sort_by_key(|&i| links[i].entry);
        }

        // Keys are handed out per destination slot in local device order.
        let mut keys = vec![0; links.len()];
        let mut in_tables = BTreeMap::new();
        for slot in placement.slots() {
            let table: Vec<usize> = placement
                .devices_on(slot)
                .iter()
                .flat_map(|&dev| incoming[dev as usize].iter().copied())
                .collect();
            if table.len() > MAX_SLOT_ENTRIES {
                return sim_error!(format!(
                    "{}: {} incoming edges on {slot}, at most {MAX_SLOT_ENTRIES} allowed",
                    self.entity,
                    table.len()
                ));
            }
            for (key, &link) in table.iter().enumerate() {
                keys[link] = key as u16;
            }
            in_tables.insert(*slot, table);
        }

        let (router, route_keys) = self.build_routes(&links, &outgoing, &addr_of)?;

        info!(self.entity ; "mapped {} devices and {} edges ({} sync) onto {} slots",
            num_devices,
            links.len(),
            links.iter().filter(|l| l.edge.is_none()).count(),
            in_tables.len());

        let num_in = incoming.iter().map(|i| i.len() as u32).collect();
        let mapping = self.mapping.insert(Mapping {
            placement,
            addr_of,
            links,
            keys,
            outgoing,
            num_in,
            in_tables,
            router,
            route_keys,
        });
        Ok(&*mapping)
    }

    /// A sync edge p -> q for every q -> p that has no p -> q.
    fn sync_links(&self) -> Vec<Link> {
        let mut links = Vec::new();
        for p in 0..self.graph.num_devices() {
            let senders: BTreeSet<DeviceId> = self.graph.incoming(p).map(|e| e.from).collect();
            for q in senders {
                if q != p && !self.graph.sends_to(p, q) {
                    debug!(self.entity ; "sync edge {p} -> {q}");
                    links.push(Link {
                        from: p,
                        entry: SYNC_ENTRY,
                        to: q,
                        edge: None,
                    });
                }
            }
        }
        links
    }

    #[allow(clippy::type_complexity)]
    fn build_routes(
        &self,
        links: &[Link],
        outgoing: &[Vec<usize>],
        addr_of: &[DeviceAddr],
    ) -> Result<(ProgRouterMesh, HashMap<(DeviceId, u32), u32>), SimError> {
        let dims = &self.config.dims;
        let mut router = ProgRouterMesh::new(dims.boards_x, dims.boards_y);
        let mut route_keys = HashMap::new();

        for (dev, out) in outgoing.iter().enumerate() {
            let dev = dev as DeviceId;
            let sender = addr_of[dev as usize].slot.encode()?;
            let mut entries: BTreeMap<u32, BTreeMap<u32, u64>> = BTreeMap::new();
            for &i in out {
                let link = &links[i];
                let dest = addr_of[link.to as usize].slot.encode()?;
                if dest == sender {
                    continue;
                }
                let mailbox = dest >> MAILBOX_SHIFT;
                let thread = dest & ((1 << MAILBOX_SHIFT) - 1);
                *entries
                    .entry(link.entry)
                    .or_default()
                    .entry(mailbox)
                    .or_default() |= 1 << thread;
            }
            for (entry, mailboxes) in entries {
                let dests: Vec<RoutingDest> = mailboxes
                    .into_iter()
                    .map(|(mailbox, threads)| RoutingDest {
                        mailbox,
                        key: entry as u16,
                        threads,
                    })
                    .collect();
                let key = router.add_dests_from_mailbox(sender >> MAILBOX_SHIFT, &dests)?;
                route_keys.insert((dev, entry), key);
            }
        }
        Ok((router, route_keys))
    }

    /// Serialize every occupied slot with the current device states.
    pub fn heap_images(&self) -> Result<Vec<HeapImage>, SimError> {
        let Some(mapping) = &self.mapping else {
            return sim_error!(format!("{}: heap images requested before map()", self.entity));
        };

        let state_size = encode(&self.entity, "state", &S::default())?.len() as u32;
        let edge_size = encode(&self.entity, "edge label", &E::default())?.len() as u32;
        let table_pins = self.config.num_pins + 1;
        let partition_bytes = self.config.dims.partition_bytes();

        let mut images = Vec::new();
        for slot in mapping.slots() {
            let mut devices = Vec::new();
            for &dev in mapping.devices_on(slot) {
                let mut pins = vec![ArenaPin::default(); table_pins as usize];
                for (entry, pin) in pins.iter_mut().enumerate() {
                    pin.route_key = mapping.route_key(dev, entry as u32).unwrap_or(0);
                }
                for &i in &mapping.outgoing[dev as usize] {
                    let link = &mapping.links[i];
                    let dest = mapping.addr_of[link.to as usize];
                    pins[link.entry as usize].neighbours.push(Neighbour {
                        slot: dest.slot.encode()?,
                        local: dest.local,
                        key: mapping.keys[i],
                    });
                }
                devices.push(ArenaDevice {
                    global_id: dev,
                    state: encode(&self.entity, "state", &self.states[dev as usize])?,
                    pins,
                    num_in: mapping.num_in(dev),
                    fan_out: self.graph.outgoing(dev).count() as u32,
                });
            }

            let default_label = E::default();
            let mut in_edges = Vec::new();
            for &i in mapping.in_tables.get(slot).map_or(&[][..], Vec::as_slice) {
                let label = match mapping.links[i].edge {
                    Some(edge) => &self.graph.edges()[edge].label,
                    None => &default_label,
                };
                in_edges.push(encode(&self.entity, "edge label", label)?);
            }

            let arena = SlotArena {
                slot: *slot,
                discipline: self.config.discipline,
                table_pins,
                state_size,
                edge_size,
                message_bytes: self.config.message_bytes,
                devices,
                in_edges,
            };
            let max_bytes = partition_bytes - STACK_BYTES;
            let image = arena.serialize(slot.heap_base(partition_bytes), max_bytes)?;
            debug!(self.entity ; "{slot}: {} byte image", image.bytes.len());
            images.push(image);
        }
        Ok(images)
    }

    /// The router table of every board DRAM as an image for the first core
    /// of that DRAM.
    pub fn router_images(&self) -> Result<Vec<HeapImage>, SimError> {
        let Some(mapping) = &self.mapping else {
            return sim_error!(format!("{}: router tables requested before map()", self.entity));
        };
        let mut images = Vec::new();
        for (board_x, board_y, ram, bytes) in mapping.router().tables() {
            images.push(HeapImage {
                slot: SlotAddress::from_core(board_x, board_y, ram as u32 * CORES_PER_DRAM, 0),
                heap_base: ROUTER_TABLE_BASE,
                bytes: bytes.to_vec(),
            });
        }
        Ok(images)
    }
}

fn encode<T: Serialize>(entity: &Entity, what: &str, value: &T) -> Result<Vec<u8>, SimError> {
    bincode::serialize(value).map_err(|e| SimError(format!("{entity}: cannot encode {what}: {e}")))
}
