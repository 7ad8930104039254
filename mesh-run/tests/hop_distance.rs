// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::io::Write;
use std::sync::Arc;

use mesh_config::run_config::RunConfig;
use mesh_config::settings::{BackendKind, Discipline};
use mesh_engine::engine::Engine;
use mesh_engine::test_helpers::start_test;
use mesh_run::runner::{Stat, find, run};
use mesh_track::tracker::dev_null_tracker;
use tempfile::NamedTempFile;

/// Eight slots on one mailbox.
fn small_mesh() -> RunConfig {
    RunConfig {
        mailboxes_x: Some(1),
        mailboxes_y: Some(1),
        cores_per_mailbox: Some(2),
        threads_per_core: Some(4),
        log_bytes_per_partition: Some(17),
        grid_size: Some(4),
        ..RunConfig::none()
    }
}

fn run_config(engine: &Engine, config: &RunConfig) -> Vec<Stat> {
    run(engine.top(), config, Arc::new(dev_null_tracker)).unwrap()
}

fn distances(stats: &[Stat]) -> [u64; 3] {
    [
        find(stats, "reached").unwrap(),
        find(stats, "sum_of_distances").unwrap(),
        find(stats, "max_distance").unwrap(),
    ]
}

#[test]
fn grid_on_the_fabric() {
    let engine = start_test(file!());
    let stats = run_config(&engine, &small_mesh());
    assert_eq!(find(&stats, "devices"), Some(16));
    assert_eq!(find(&stats, "edges"), Some(48));
    assert_eq!(find(&stats, "max_fan_in"), Some(4));
    // Corner to every device of a 4 by 4 grid: 16 * 3 in total.
    assert_eq!(distances(&stats), [16, 48, 6]);
    assert!(find(&stats, "msgs_recv").unwrap() >= 48);
    assert!(find(&stats, "ticks").unwrap() > 0);
}

#[test]
fn synchronized_grid_gives_the_same_distances() {
    let engine = start_test(file!());
    for (seed, out_of_order) in [(1, true), (5, true), (1, false)] {
        let config = RunConfig {
            discipline: Some(Discipline::Sync),
            max_steps: Some(8),
            seed: Some(seed),
            deliver_out_of_order: Some(out_of_order),
            ..small_mesh()
        };
        let stats = run_config(&engine, &config);
        assert_eq!(distances(&stats), [16, 48, 6], "seed {seed}");
    }
}

#[test]
fn too_few_steps_leave_devices_unreached() {
    let engine = start_test(file!());
    let config = RunConfig {
        discipline: Some(Discipline::Sync),
        max_steps: Some(3),
        ..small_mesh()
    };
    let stats = run_config(&engine, &config);
    assert!(find(&stats, "reached").unwrap() < 16);
}

#[test]
fn grid_on_the_soft_backend() {
    let engine = start_test(file!());
    let config = RunConfig {
        backend: Some(BackendKind::Soft),
        ..small_mesh()
    };
    let stats = run_config(&engine, &config);
    assert_eq!(distances(&stats), [16, 48, 6]);
    assert_eq!(find(&stats, "msgs_sent"), find(&stats, "msgs_recv").map(|n| n - 1));
}

#[test]
fn soft_backend_is_asynchronous_only() {
    let engine = start_test(file!());
    let config = RunConfig {
        backend: Some(BackendKind::Soft),
        discipline: Some(Discipline::Sync),
        ..small_mesh()
    };
    let err = run(engine.top(), &config, Arc::new(dev_null_tracker)).unwrap_err();
    assert!(err.to_string().ends_with("only runs the asynchronous discipline"));
}

#[test]
fn edges_from_a_file() {
    let engine = start_test(file!());
    let mut edges = NamedTempFile::new().unwrap();
    write!(edges, "4 3\n0 1\n1 2\n3 0\n").unwrap();
    let config = RunConfig {
        edges: Some(edges.path().to_path_buf()),
        ..small_mesh()
    };
    let stats = run_config(&engine, &config);
    assert_eq!(find(&stats, "devices"), Some(4));
    assert_eq!(find(&stats, "edges"), Some(3));
    assert_eq!(find(&stats, "max_fan_out"), Some(1));
    // Device 3 has no path from device 0.
    assert_eq!(distances(&stats), [3, 3, 2]);
}

#[test]
fn memory_images_are_loaded() {
    let engine = start_test(file!());
    let mut code = NamedTempFile::new().unwrap();
    write!(code, "@00000000\n13 00 00 00 6F 00 00 00\n").unwrap();
    let config = RunConfig {
        code: Some(code.path().to_path_buf()),
        ..small_mesh()
    };
    let stats = run_config(&engine, &config);
    assert_eq!(find(&stats, "code_bytes"), Some(8));
    assert_eq!(find(&stats, "data_bytes"), Some(0));
}

#[test]
fn source_must_exist() {
    let engine = start_test(file!());
    let config = RunConfig {
        source: Some(16),
        ..small_mesh()
    };
    let err = run(engine.top(), &config, Arc::new(dev_null_tracker)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Error: top::run: source 16 is not one of the 16 devices"
    );
}

#[test]
fn stats_print_as_name_value() {
    let stat = Stat {
        name: "reached",
        value: 12,
    };
    assert_eq!(stat.to_string(), "reached:12");
}
