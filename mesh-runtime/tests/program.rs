// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use mesh_config::settings::{Discipline, MeshDims, PlacerConfig};
use mesh_engine::test_helpers::start_test;
use mesh_mapper::image::HeapImage;
use mesh_mapper::pgraph::{MapperConfig, PGraph};
use mesh_runtime::device::{Device, Pin};
use mesh_runtime::program::SlotProgram;
use serde::{Deserialize, Serialize};

#[derive(Clone, Default, Serialize, Deserialize)]
struct Sample {
    value: u32,
}

impl Device for Sample {
    type Edge = u16;
    type Message = u32;

    fn init(&mut self, _pin: &mut Pin) {}

    fn send(&mut self, _msg: &mut u32, _pin: &mut Pin) {}

    fn recv(&mut self, _msg: &u32, _edge: &u16, _pin: &mut Pin) {}

    fn step(&mut self, _pin: &mut Pin) -> bool {
        false
    }

    fn finish(&mut self, _msg: &mut u32) -> bool {
        false
    }
}

fn config(message_bytes: u32) -> MapperConfig {
    MapperConfig {
        dims: MeshDims {
            mailboxes_x: 1,
            mailboxes_y: 1,
            cores_per_mailbox: 1,
            threads_per_core: 2,
            log_bytes_per_partition: 17,
            ..MeshDims::default()
        },
        placer: PlacerConfig::default(),
        discipline: Discipline::Async,
        num_pins: 2,
        message_bytes,
    }
}

fn images<S: Serialize + Default>(graph: &mut PGraph<S, u16>) -> Vec<HeapImage> {
    graph.map().unwrap();
    graph.heap_images().unwrap()
}

#[test]
fn devices_edges_and_states_are_restored() {
    let engine = start_test(file!());
    let mut graph: PGraph<Sample, u16> = PGraph::new(engine.top(), "sample", config(4));
    let devices: Vec<u32> = (0..4).map(|_| graph.new_device().unwrap()).collect();
    for &dev in &devices {
        graph.state_mut(dev).unwrap().value = 100 + dev;
    }
    graph.add_labelled_edge(7, devices[0], 1, devices[1]).unwrap();
    graph.add_labelled_edge(9, devices[1], 0, devices[0]).unwrap();
    graph.add_edge(devices[2], 0, devices[3]).unwrap();

    let mut seen = Vec::new();
    for image in images(&mut graph) {
        let program = SlotProgram::<Sample>::load(&image).unwrap();
        assert_eq!(program.slot, image.slot);
        assert_eq!(program.message_bytes, 4);
        for device in &program.devices {
            assert_eq!(device.state.value, 100 + device.global_id);
            // Sync entry plus two application pins.
            assert_eq!(device.entries.len(), 3);
            for neighbour in device.entries.iter().flatten() {
                if neighbour.slot == image.slot.encode().unwrap() {
                    let label = program.in_edges[usize::from(neighbour.key)];
                    assert!([0, 7, 9].contains(&label));
                }
            }
            seen.push(device.global_id);
        }
    }
    seen.sort();
    assert_eq!(seen, devices);
}

#[test]
fn state_size_must_match() {
    let engine = start_test(file!());
    let mut graph: PGraph<u64, u16> = PGraph::new(engine.top(), "wide", config(4));
    graph.new_device().unwrap();
    let image = images(&mut graph).remove(0);
    assert_eq!(
        SlotProgram::<Sample>::load(&image).err().unwrap().to_string(),
        format!("Error: {}: image holds 8 byte states, got 4", image.slot)
    );
}

#[test]
fn message_size_must_match() {
    let engine = start_test(file!());
    let mut graph: PGraph<Sample, u16> = PGraph::new(engine.top(), "sample", config(8));
    graph.new_device().unwrap();
    let image = images(&mut graph).remove(0);
    assert_eq!(
        SlotProgram::<Sample>::load(&image).err().unwrap().to_string(),
        format!("Error: {}: image expects 8 byte messages, got 4", image.slot)
    );
}

#[test]
fn truncated_image() {
    let engine = start_test(file!());
    let mut graph: PGraph<Sample, u16> = PGraph::new(engine.top(), "sample", config(4));
    graph.new_device().unwrap();
    let mut image = images(&mut graph).remove(0);
    image.bytes.truncate(40);
    assert!(SlotProgram::<Sample>::load(&image).is_err());
}
