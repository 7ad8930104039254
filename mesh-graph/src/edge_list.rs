// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Reader for plain-text edge lists.
//!
//! The file starts with a `numNodes numEdges` header followed by one
//! `src dst` pair per edge. All values are whitespace separated.

use std::fs;
use std::path::Path;

use mesh_engine::sim_error;
use mesh_engine::types::SimError;

use crate::graph::{DeviceId, Graph};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdgeList {
    pub num_nodes: u32,
    pub edges: Vec<(u32, u32)>,
}

impl EdgeList {
    pub fn parse(text: &str) -> Result<Self, SimError> {
        let mut values = text.split_whitespace().enumerate().map(|(i, token)| {
            token
                .parse::<u32>()
                .map_err(|_| SimError(format!("edge list: bad value '{token}' at item {i}")))
        });

        let mut next = |what: &str| match values.next() {
            Some(value) => value,
            None => sim_error!(format!("edge list: missing {what}")),
        };

        let num_nodes = next("node count")?;
        let num_edges = next("edge count")?;
        let mut edges = Vec::new();
        for _ in 0..num_edges {
            let src = next("edge source")?;
            let dst = next("edge destination")?;
            if src >= num_nodes || dst >= num_nodes {
                return sim_error!(format!(
                    "edge list: edge {src} -> {dst} outside {num_nodes} nodes"
                ));
            }
            edges.push((src, dst));
        }
        if next("").is_ok() {
            return sim_error!(format!("edge list: more than {num_edges} edges"));
        }

        Ok(Self { num_nodes, edges })
    }

    pub fn read(path: &Path) -> Result<Self, SimError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) => sim_error!(format!("can't open '{}': {e}", path.display())),
        }
    }

    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn neighbours(&self, node: u32) -> impl Iterator<Item = u32> + '_ {
        self.edges
            .iter()
            .filter(move |(src, _)| *src == node)
            .map(|&(_, dst)| dst)
    }

    #[must_use]
    pub fn fan_out(&self, node: u32) -> usize {
        self.neighbours(node).count()
    }

    #[must_use]
    pub fn fan_in(&self, node: u32) -> usize {
        self.edges.iter().filter(|(_, dst)| *dst == node).count()
    }

    #[must_use]
    pub fn max_fan_out(&self) -> usize {
        (0..self.num_nodes)
            .map(|n| self.fan_out(n))
            .max()
            .unwrap_or(0)
    }

    /// Add one device per node and one edge per pair, all on `pin`.
    ///
    /// Returns the device created for each node.
    pub fn build_graph<E: Default>(
        &self,
        graph: &mut Graph<E>,
        pin: u32,
    ) -> Result<Vec<DeviceId>, SimError> {
        let devices: Vec<DeviceId> = (0..self.num_nodes).map(|_| graph.new_device()).collect();
        for &(src, dst) in &self.edges {
            graph.add_edge(devices[src as usize], pin, devices[dst as usize])?;
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_token() {
        assert_eq!(
            EdgeList::parse("2 1\n0 x").unwrap_err().to_string(),
            "Error: edge list: bad value 'x' at item 3"
        );
    }

    #[test]
    fn truncated() {
        assert_eq!(
            EdgeList::parse("3 2\n0 1\n").unwrap_err().to_string(),
            "Error: edge list: missing edge source"
        );
    }

    #[test]
    fn edge_count_larger_than_the_file() {
        assert_eq!(
            EdgeList::parse("3 4294967295\n0 1\n").unwrap_err().to_string(),
            "Error: edge list: missing edge source"
        );
    }

    #[test]
    fn node_out_of_range() {
        assert!(EdgeList::parse("2 1\n0 2\n").is_err());
    }

    #[test]
    fn trailing_values() {
        assert!(EdgeList::parse("2 1\n0 1\n1 0\n").is_err());
    }
}
