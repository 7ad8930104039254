// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A directed multigraph of devices connected through numbered output pins.
//!
//! Devices are identified by dense ids allocated in creation order. An edge
//! leaves a device on one of its output pins and carries a label of type `E`
//! that is handed to the receiver with every message arriving on that edge.

use std::rc::Rc;

use mesh_engine::sim_error;
use mesh_engine::types::SimError;
use mesh_track::debug;
use mesh_track::entity::Entity;

/// Dense device identifier.
pub type DeviceId = u32;

/// A directed edge `(from, pin) -> to`.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge<E> {
    pub from: DeviceId,
    pub pin: u32,
    pub to: DeviceId,
    pub label: E,
}

pub struct Graph<E> {
    pub entity: Rc<Entity>,
    num_pins: u32,
    edges: Vec<Edge<E>>,

    /// Indices into `edges`, per device.
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl<E> Graph<E> {
    /// Create an empty graph whose devices each have `num_pins` output pins.
    #[must_use]
    pub fn new(parent: &Rc<Entity>, name: &str, num_pins: u32) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, name)),
            num_pins,
            edges: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    pub fn new_device(&mut self) -> DeviceId {
        let id = self.outgoing.len() as DeviceId;
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Add an edge with the default label.
    pub fn add_edge(&mut self, from: DeviceId, pin: u32, to: DeviceId) -> Result<(), SimError>
    where
        E: Default,
    {
        self.add_labelled_edge(E::default(), from, pin, to)
    }

    pub fn add_labelled_edge(
        &mut self,
        label: E,
        from: DeviceId,
        pin: u32,
        to: DeviceId,
    ) -> Result<(), SimError> {
        self.check_device(from)?;
        self.check_device(to)?;
        if pin >= self.num_pins {
            return sim_error!(format!(
                "{}: pin {pin} out of range (device {from} has {} pins)",
                self.entity, self.num_pins
            ));
        }

        let index = self.edges.len();
        self.edges.push(Edge {
            from,
            pin,
            to,
            label,
        });
        self.outgoing[from as usize].push(index);
        self.incoming[to as usize].push(index);
        debug!(self.entity ; "edge {from}:{pin} -> {to}");
        Ok(())
    }

    fn check_device(&self, id: DeviceId) -> Result<(), SimError> {
        if id as usize >= self.outgoing.len() {
            return sim_error!(format!("{}: unknown device {id}", self.entity));
        }
        Ok(())
    }

    #[must_use]
    pub fn num_devices(&self) -> u32 {
        self.outgoing.len() as u32
    }

    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn num_pins(&self) -> u32 {
        self.num_pins
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge<E>] {
        &self.edges
    }

    /// Edges leaving `dev`, in the order they were added.
    pub fn outgoing(&self, dev: DeviceId) -> impl Iterator<Item = &Edge<E>> {
        self.outgoing
            .get(dev as usize)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    /// Edges arriving at `dev`, in the order they were added.
    pub fn incoming(&self, dev: DeviceId) -> impl Iterator<Item = &Edge<E>> {
        self.incoming
            .get(dev as usize)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    #[must_use]
    pub fn fan_out(&self, dev: DeviceId, pin: u32) -> usize {
        self.outgoing(dev).filter(|e| e.pin == pin).count()
    }

    #[must_use]
    pub fn fan_in(&self, dev: DeviceId) -> usize {
        self.incoming.get(dev as usize).map_or(0, Vec::len)
    }

    /// Largest fan-out of any single pin.
    #[must_use]
    pub fn max_fan_out(&self) -> usize {
        (0..self.num_devices())
            .flat_map(|dev| (0..self.num_pins).map(move |pin| (dev, pin)))
            .map(|(dev, pin)| self.fan_out(dev, pin))
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn max_fan_in(&self) -> usize {
        self.incoming.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// True if at least one edge goes from `from` to `to` on any pin.
    #[must_use]
    pub fn sends_to(&self, from: DeviceId, to: DeviceId) -> bool {
        self.outgoing(from).any(|e| e.to == to)
    }

    /// Devices connected to `dev` in either direction, one entry per edge.
    ///
    /// Self loops are skipped as they can never be cut.
    pub fn neighbours(&self, dev: DeviceId) -> impl Iterator<Item = DeviceId> + '_ {
        self.outgoing(dev)
            .map(|e| e.to)
            .chain(self.incoming(dev).map(|e| e.from))
            .filter(move |&other| other != dev)
    }
}
