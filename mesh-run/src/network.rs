// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The graphs the hop-distance application runs on.

use mesh_engine::types::{SimError, SimResult};
use mesh_graph::edge_list::EdgeList;
use mesh_mapper::pgraph::PGraph;

use crate::hops::{HopDistance, Origin};

pub type HopGraph = PGraph<HopDistance, Origin>;

/// One device per node and one edge per line of the list.
pub fn add_edge_list(graph: &mut HopGraph, list: &EdgeList) -> SimResult {
    for _ in 0..list.num_nodes {
        graph.new_device()?;
    }
    for &(src, dst) in &list.edges {
        graph.add_labelled_edge(Origin::Neighbour, src, 0, dst)?;
    }
    Ok(())
}

/// A `side` by `side` grid with edges both ways between horizontal and
/// vertical neighbours. Device ids run along the rows.
pub fn add_grid(graph: &mut HopGraph, side: u32) -> SimResult {
    let id = |x: u32, y: u32| y * side + x;
    for _ in 0..side * side {
        graph.new_device()?;
    }
    for y in 0..side {
        for x in 0..side {
            if x + 1 < side {
                link(graph, id(x, y), id(x + 1, y))?;
            }
            if y + 1 < side {
                link(graph, id(x, y), id(x, y + 1))?;
            }
        }
    }
    Ok(())
}

fn link(graph: &mut HopGraph, a: u32, b: u32) -> Result<(), SimError> {
    graph.add_labelled_edge(Origin::Neighbour, a, 0, b)?;
    graph.add_labelled_edge(Origin::Neighbour, b, 0, a)
}

#[cfg(test)]
mod tests {
    use mesh_config::settings::{Discipline, MeshDims, PlacerConfig};
    use mesh_engine::test_helpers::start_test;
    use mesh_mapper::pgraph::MapperConfig;

    use super::*;

    fn empty(engine: &mesh_engine::engine::Engine) -> HopGraph {
        let config = MapperConfig {
            dims: MeshDims::default(),
            placer: PlacerConfig::default(),
            discipline: Discipline::Async,
            num_pins: 1,
            message_bytes: 4,
        };
        PGraph::new(engine.top(), "hops", config)
    }

    #[test]
    fn grid_edges() {
        let engine = start_test(file!());
        let mut graph = empty(&engine);
        add_grid(&mut graph, 3).unwrap();
        let graph = graph.graph();
        assert_eq!(graph.num_devices(), 9);
        assert_eq!(graph.num_edges(), 24);
        assert_eq!(graph.fan_in(4), 4);
        assert_eq!(graph.fan_out(0, 0), 2);
    }

    #[test]
    fn edge_list_is_directed() {
        let engine = start_test(file!());
        let mut graph = empty(&engine);
        let list = EdgeList::parse("3 2\n0 1\n1 2\n").unwrap();
        add_edge_list(&mut graph, &list).unwrap();
        let graph = graph.graph();
        assert_eq!(graph.num_edges(), 2);
        assert_eq!(graph.fan_in(0), 0);
        assert_eq!(graph.fan_out(2, 0), 0);
    }
}
