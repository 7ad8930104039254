// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::io::Write;

use mesh_engine::test_helpers::start_test;
use mesh_graph::edge_list::EdgeList;
use mesh_graph::graph::Graph;

#[test]
fn fan_counts_follow_the_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "3 2").unwrap();
    writeln!(file, "0 1").unwrap();
    writeln!(file, "2 1").unwrap();

    let edges = EdgeList::read(file.path()).unwrap();
    assert_eq!(edges.num_nodes, 3);
    assert_eq!(edges.num_edges(), 2);
    assert_eq!(
        (0..3).map(|n| edges.fan_out(n)).collect::<Vec<_>>(),
        [1, 0, 1]
    );
    assert_eq!((0..3).map(|n| edges.fan_in(n)).collect::<Vec<_>>(), [0, 2, 0]);
    assert_eq!((0..3).map(|n| edges.fan_out(n)).sum::<usize>(), 2);
    assert_eq!(edges.max_fan_out(), 1);

    let engine = start_test(file!());
    let mut graph: Graph<()> = Graph::new(engine.top(), "file", 1);
    let devices = edges.build_graph(&mut graph, 0).unwrap();
    assert_eq!(devices, [0, 1, 2]);
    assert_eq!(graph.num_edges(), 2);
    assert_eq!(graph.fan_in(1), 2);
    assert_eq!(graph.fan_out(2, 0), 1);
}

#[test]
fn missing_file() {
    let err = EdgeList::read(std::path::Path::new("/no/such/edges.txt")).unwrap_err();
    assert!(err.to_string().starts_with("Error: can't open '/no/such/edges.txt'"));
}

#[test]
fn edges_on_unknown_pins_are_rejected() {
    let engine = start_test(file!());
    let edges = EdgeList::parse("2 1 0 1").unwrap();
    let mut graph: Graph<()> = Graph::new(engine.top(), "file", 1);
    let err = edges.build_graph(&mut graph, 1).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Error: top::file: pin 1 out of range (device 0 has 1 pins)"
    );
}
