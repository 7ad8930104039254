// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Hierarchical balanced placement of a graph onto mesh slots.
//!
//! The devices are first split between the boards, then each board's devices
//! between its mailboxes, and finally each mailbox's devices between its
//! threads. At every level the devices of one cell are partitioned into
//! balanced parts so as to reduce the number of edges crossing between parts.
//! For the board and mailbox levels the parts are then arranged on the 2-D
//! grid of cells so that heavily connected parts end up close together.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use itertools::Itertools;
use mesh_config::settings::{MeshDims, PlacerConfig, PlacerMethod};
use mesh_engine::types::SimError;
use mesh_track::entity::Entity;
use mesh_track::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::address::SlotAddress;
use crate::graph::{DeviceId, Graph};

/// The levels of the mesh hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Board,
    Mailbox,
    Thread,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Board => write!(f, "board"),
            Level::Mailbox => write!(f, "mailbox"),
            Level::Thread => write!(f, "thread"),
        }
    }
}

/// Result of partitioning the devices of one cell.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionStats {
    pub level: Level,
    pub num_devices: usize,
    pub part_sizes: Vec<usize>,

    /// Edges between devices of this cell that ended up in different parts.
    pub cut_edges: usize,
}

/// Maps each device to exactly one slot.
#[derive(Debug, Default)]
pub struct Placement {
    slot_of: Vec<SlotAddress>,
    devices_on: BTreeMap<SlotAddress, Vec<DeviceId>>,
    stats: Vec<PartitionStats>,
}

impl Placement {
    #[must_use]
    pub fn slot_of(&self, dev: DeviceId) -> Option<SlotAddress> {
        self.slot_of.get(dev as usize).copied()
    }

    /// Devices placed on `slot` in ascending id order.
    #[must_use]
    pub fn devices_on(&self, slot: &SlotAddress) -> &[DeviceId] {
        self.devices_on.get(slot).map_or(&[], Vec::as_slice)
    }

    /// Occupied slots in ascending address order.
    pub fn slots(&self) -> impl Iterator<Item = &SlotAddress> {
        self.devices_on.keys()
    }

    #[must_use]
    pub fn num_devices(&self) -> usize {
        self.slot_of.len()
    }

    /// Number of edges whose ends are on different slots.
    #[must_use]
    pub fn cut_edges<E>(&self, graph: &Graph<E>) -> usize {
        graph
            .edges()
            .iter()
            .filter(|e| self.slot_of(e.from) != self.slot_of(e.to))
            .count()
    }

    #[must_use]
    pub fn stats(&self) -> &[PartitionStats] {
        &self.stats
    }

    fn assign(&mut self, dev: DeviceId, slot: SlotAddress) {
        self.slot_of[dev as usize] = slot;
        self.devices_on.entry(slot).or_default().push(dev);
    }
}

/// Undirected adjacency with one entry per edge end, sorted.
pub type Adjacency = Vec<Vec<DeviceId>>;

/// Part sizes: the first `n % parts` parts take one extra device.
fn target_sizes(n: usize, parts: usize) -> Vec<usize> {
    (0..parts)
        .map(|i| n / parts + usize::from(i < n % parts))
        .collect()
}

/// Smallest and largest part allowed for `n` devices over `parts` parts.
#[must_use]
pub fn balance_bounds(n: usize, parts: usize, tolerance: f64) -> (usize, usize) {
    let mean = n as f64 / parts as f64;
    let lo = (mean * (1.0 - tolerance)).floor().max(0.0) as usize;
    let hi = (mean * (1.0 + tolerance)).ceil() as usize;
    (lo, hi)
}

pub struct Placer {
    pub entity: Rc<Entity>,
    dims: MeshDims,
    config: PlacerConfig,
    rng: StdRng,
}

impl Placer {
    #[must_use]
    pub fn new(parent: &Rc<Entity>, dims: MeshDims, config: PlacerConfig) -> Self {
        Self {
            entity: Rc::new(Entity::new(parent, "placer")),
            dims,
            rng: StdRng::seed_from_u64(config.seed),
            config,
        }
    }

    /// Place every device of `graph` on a slot.
    pub fn place<E>(&mut self, graph: &Graph<E>) -> Result<Placement, SimError> {
        self.dims
            .validate()
            .map_err(|e| SimError(e.to_string()))?;

        let adjacency: Adjacency = (0..graph.num_devices())
            .map(|dev| graph.neighbours(dev).sorted().collect())
            .collect();

        let num_devices = graph.num_devices() as usize;
        let mut placement = Placement {
            slot_of: vec![SlotAddress::default(); num_devices],
            ..Placement::default()
        };

        let dims = self.dims;
        let all: Vec<DeviceId> = (0..graph.num_devices()).collect();
        let boards = self.partition_cell(&adjacency, &all, Level::Board, &mut placement);
        let board_cells = self.arrange(&adjacency, &boards, dims.boards_x, dims.boards_y);

        for (board, board_devices) in boards.iter().enumerate() {
            let cell = board_cells[board];
            let board_x = cell % dims.boards_x;
            let board_y = cell / dims.boards_x;

            let mailboxes =
                self.partition_cell(&adjacency, board_devices, Level::Mailbox, &mut placement);
            let mailbox_cells =
                self.arrange(&adjacency, &mailboxes, dims.mailboxes_x, dims.mailboxes_y);

            for (mailbox, mailbox_devices) in mailboxes.iter().enumerate() {
                let cell = mailbox_cells[mailbox];
                let threads =
                    self.partition_cell(&adjacency, mailbox_devices, Level::Thread, &mut placement);
                for (thread, thread_devices) in threads.iter().enumerate() {
                    let thread = thread as u32;
                    let slot = SlotAddress {
                        board_y,
                        board_x,
                        mailbox_y: cell / dims.mailboxes_x,
                        mailbox_x: cell % dims.mailboxes_x,
                        core: thread / dims.threads_per_core,
                        thread: thread % dims.threads_per_core,
                    };
                    for &dev in thread_devices {
                        placement.assign(dev, slot);
                    }
                }
            }
        }

        for devices in placement.devices_on.values_mut() {
            devices.sort_unstable();
        }

        info!(self.entity ; "placed {} devices on {} slots, {} cut edges",
            num_devices, placement.devices_on.len(), placement.cut_edges(graph));
        Ok(placement)
    }

    fn partition_cell(
        &mut self,
        adjacency: &Adjacency,
        devices: &[DeviceId],
        level: Level,
        placement: &mut Placement,
    ) -> Vec<Vec<DeviceId>> {
        let num_parts = match level {
            Level::Board => self.dims.num_boards(),
            Level::Mailbox => self.dims.mailboxes_per_board(),
            Level::Thread => self.dims.threads_per_mailbox(),
        } as usize;
        let parts = self.partition(adjacency, devices, num_parts);

        if !devices.is_empty() {
            let stats = PartitionStats {
                level,
                num_devices: devices.len(),
                part_sizes: parts.iter().map(Vec::len).collect(),
                cut_edges: cut_between(adjacency, &parts),
            };
            debug!(self.entity ; "{level} level: {} devices, sizes {:?}, {} cut",
                stats.num_devices, stats.part_sizes, stats.cut_edges);
            placement.stats.push(stats);
        }
        parts
    }

    /// Split `devices` into `num_parts` balanced parts.
    pub fn partition(
        &mut self,
        adjacency: &Adjacency,
        devices: &[DeviceId],
        num_parts: usize,
    ) -> Vec<Vec<DeviceId>> {
        let n = devices.len();
        let mut parts = vec![Vec::new(); num_parts];
        if n == 0 || num_parts == 0 {
            return parts;
        }
        if num_parts == 1 {
            parts[0] = devices.to_vec();
            return parts;
        }
        if num_parts >= n {
            for (part, &dev) in parts.iter_mut().zip(devices) {
                part.push(dev);
            }
            return parts;
        }

        let order: Vec<DeviceId> = match self.config.method {
            PlacerMethod::Direct => devices.iter().copied().sorted().collect(),
            PlacerMethod::Random => {
                let mut order = devices.to_vec();
                order.shuffle(&mut self.rng);
                order
            }
            PlacerMethod::Default => bfs_order(adjacency, devices),
        };

        let targets = target_sizes(n, num_parts);
        bisect(&order, &targets, &mut parts);

        if self.config.method == PlacerMethod::Default {
            self.refine(adjacency, &mut parts);
        }
        parts
    }

    /// Single device relocation moves that strictly reduce the cut.
    fn refine(&self, adjacency: &Adjacency, parts: &mut [Vec<DeviceId>]) {
        let num_parts = parts.len();
        let mut part_of: HashMap<DeviceId, usize> = HashMap::new();
        for (p, devices) in parts.iter().enumerate() {
            for &dev in devices {
                part_of.insert(dev, p);
            }
        }
        let mut sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
        let (lo, hi) = balance_bounds(part_of.len(), num_parts, self.config.tolerance);
        let members: Vec<DeviceId> = part_of.keys().copied().sorted().collect();

        let mut links = vec![0usize; num_parts];
        for pass in 0..self.config.effort {
            let mut moves = 0;
            for &dev in &members {
                let from = part_of[&dev];
                links.iter_mut().for_each(|l| *l = 0);
                for other in &adjacency[dev as usize] {
                    if let Some(&p) = part_of.get(other) {
                        links[p] += 1;
                    }
                }

                let mut best: Option<(usize, usize)> = None;
                for (to, &count) in links.iter().enumerate() {
                    if to == from || count <= links[from] {
                        continue;
                    }
                    if sizes[from] <= lo || sizes[to] >= hi {
                        continue;
                    }
                    let gain = count - links[from];
                    if best.is_none_or(|(_, best_gain)| gain > best_gain) {
                        best = Some((to, gain));
                    }
                }

                if let Some((to, _)) = best {
                    part_of.insert(dev, to);
                    sizes[from] -= 1;
                    sizes[to] += 1;
                    moves += 1;
                }
            }
            debug!(self.entity ; "refinement pass {pass}: {moves} moves");
            if moves == 0 {
                break;
            }
        }

        for part in parts.iter_mut() {
            part.clear();
        }
        for dev in members {
            parts[part_of[&dev]].push(dev);
        }
    }

    /// Choose a grid cell for each part, returning the cell index of each.
    fn arrange(
        &mut self,
        adjacency: &Adjacency,
        parts: &[Vec<DeviceId>],
        width: u32,
        height: u32,
    ) -> Vec<u32> {
        let identity: Vec<u32> = (0..parts.len() as u32).collect();
        if self.config.method != PlacerMethod::Default {
            return identity;
        }

        let grid = Grid::new(adjacency, parts, width, height);
        if grid.cost(&identity) == 0 {
            return identity;
        }

        // part_at[cell] is the part occupying that cell.
        let mut best = identity.clone();
        let mut best_cost = grid.improve(&mut best);
        for _ in 0..self.config.effort {
            let mut attempt = identity.clone();
            attempt.shuffle(&mut self.rng);
            let cost = grid.improve(&mut attempt);
            if cost < best_cost {
                best = attempt;
                best_cost = cost;
            }
        }
        debug!(self.entity ; "{width}x{height} grid arranged with cost {best_cost}");

        let mut cell_of = vec![0; parts.len()];
        for (cell, &part) in best.iter().enumerate() {
            cell_of[part as usize] = cell as u32;
        }
        cell_of
    }
}

/// Breadth-first order of the devices, restarting at the lowest unvisited id
/// of each connected component.
fn bfs_order(adjacency: &Adjacency, devices: &[DeviceId]) -> Vec<DeviceId> {
    let mut visited: HashMap<DeviceId, bool> = devices.iter().map(|&d| (d, false)).collect();
    let mut order = Vec::with_capacity(devices.len());
    let mut queue = VecDeque::new();

    for start in devices.iter().copied().sorted() {
        if visited[&start] {
            continue;
        }
        visited.insert(start, true);
        queue.push_back(start);
        while let Some(dev) = queue.pop_front() {
            order.push(dev);
            for &other in &adjacency[dev as usize] {
                if visited.get(&other) == Some(&false) {
                    visited.insert(other, true);
                    queue.push_back(other);
                }
            }
        }
    }
    order
}

/// Recursively halve `order`, giving each half the total size of its parts.
fn bisect(order: &[DeviceId], targets: &[usize], parts: &mut [Vec<DeviceId>]) {
    if targets.len() == 1 {
        parts[0].extend_from_slice(order);
        return;
    }
    let mid = targets.len() / 2;
    let left: usize = targets[..mid].iter().sum();
    let (left_parts, right_parts) = parts.split_at_mut(mid);
    bisect(&order[..left], &targets[..mid], left_parts);
    bisect(&order[left..], &targets[mid..], right_parts);
}

fn cut_between(adjacency: &Adjacency, parts: &[Vec<DeviceId>]) -> usize {
    let part_of: HashMap<DeviceId, usize> = parts
        .iter()
        .enumerate()
        .flat_map(|(p, devices)| devices.iter().map(move |&d| (d, p)))
        .collect();
    let ends: usize = part_of
        .iter()
        .map(|(dev, p)| {
            adjacency[*dev as usize]
                .iter()
                .filter(|other| part_of.get(other).is_some_and(|q| q != p))
                .count()
        })
        .sum();
    ends / 2
}

/// Connection counts between parts laid out on a grid.
struct Grid {
    width: u32,
    height: u32,
    links: Vec<Vec<usize>>,
}

impl Grid {
    fn new(adjacency: &Adjacency, parts: &[Vec<DeviceId>], width: u32, height: u32) -> Self {
        let part_of: HashMap<DeviceId, usize> = parts
            .iter()
            .enumerate()
            .flat_map(|(p, devices)| devices.iter().map(move |&d| (d, p)))
            .collect();
        let mut links = vec![vec![0; parts.len()]; parts.len()];
        for (&dev, &p) in &part_of {
            for other in &adjacency[dev as usize] {
                match part_of.get(other) {
                    Some(&q) if q > p => links[p][q] += 1,
                    _ => {}
                }
            }
        }
        Self {
            width,
            height,
            links,
        }
    }

    fn distance(&self, a: usize, b: usize) -> usize {
        let (ax, ay) = (a as u32 % self.width, a as u32 / self.width);
        let (bx, by) = (b as u32 % self.width, b as u32 / self.width);
        (ax.abs_diff(bx) + ay.abs_diff(by)) as usize
    }

    /// Cost of a layout where `part_at[cell]` holds the part in each cell.
    fn cost(&self, part_at: &[u32]) -> usize {
        let mut cell_of = vec![0; part_at.len()];
        for (cell, &part) in part_at.iter().enumerate() {
            cell_of[part as usize] = cell;
        }
        let mut cost = 0;
        for (p, row) in self.links.iter().enumerate() {
            for (q, &count) in row.iter().enumerate().skip(p + 1) {
                if count != 0 {
                    cost += count * self.distance(cell_of[p], cell_of[q]);
                }
            }
        }
        cost
    }

    /// Swap neighbouring cells while that strictly lowers the cost.
    fn improve(&self, part_at: &mut [u32]) -> usize {
        let mut cost = self.cost(part_at);
        loop {
            let mut improved = false;
            for y in 0..self.height {
                for x in 0..self.width {
                    let here = (y * self.width + x) as usize;
                    for (dx, dy) in [(1, 0), (0, 1), (1, 1)] {
                        if x + dx >= self.width || y + dy >= self.height {
                            continue;
                        }
                        let there = ((y + dy) * self.width + x + dx) as usize;
                        part_at.swap(here, there);
                        let new_cost = self.cost(part_at);
                        if new_cost < cost {
                            cost = new_cost;
                            improved = true;
                        } else {
                            part_at.swap(here, there);
                        }
                    }
                }
            }
            if !improved {
                return cost;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_differ_by_at_most_one() {
        assert_eq!(target_sizes(10, 4), [3, 3, 2, 2]);
        assert_eq!(target_sizes(8, 4), [2, 2, 2, 2]);
    }

    #[test]
    fn bisection_keeps_order() {
        let order = [5, 4, 3, 2, 1, 0, 9];
        let mut parts = vec![Vec::new(); 3];
        bisect(&order, &target_sizes(7, 3), &mut parts);
        assert_eq!(parts, vec![vec![5, 4, 3], vec![2, 1], vec![0, 9]]);
    }

    #[test]
    fn bfs_visits_components_in_id_order() {
        let adjacency: Adjacency = vec![vec![2], vec![], vec![0, 3], vec![2]];
        assert_eq!(bfs_order(&adjacency, &[3, 2, 1, 0]), [0, 2, 3, 1]);
    }

    #[test]
    fn grid_prefers_adjacent_cells() {
        // Parts 0 and 3 are tightly connected and start on opposite corners.
        let adjacency: Adjacency = vec![vec![3, 3], vec![], vec![], vec![0, 0]];
        let parts: Vec<Vec<DeviceId>> = (0..4).map(|d| vec![d]).collect();
        let grid = Grid::new(&adjacency, &parts, 2, 2);
        let mut part_at = vec![0, 1, 2, 3];
        assert_eq!(grid.cost(&part_at), 4);
        assert_eq!(grid.improve(&mut part_at), 2);
    }
}
