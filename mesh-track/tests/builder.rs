// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::fs;

use mesh_track::builder::{TrackerConfig, TrackersConfig, setup_trackers};
use mesh_track::entity::toplevel;
use mesh_track::{info, warn};

#[test]
fn file_tracker_respects_filter() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.log");
    let path_str = path.to_str().unwrap();

    let config = TrackersConfig {
        stdout: TrackerConfig {
            enable: false,
            ..TrackerConfig::default()
        },
        log_file: TrackerConfig {
            enable: true,
            level: log::Level::Info,
            filter_regex: ".*mapper.*",
            file: Some(path_str),
        },
    };
    let tracker = setup_trackers(&config).unwrap();
    {
        let top = toplevel(&tracker, "top");
        let mapper = mesh_track::entity::Entity::new(&top, "mapper");
        info!(top ; "hidden");
        info!(mapper ; "mapped {} slots", 3);
        warn!(top ; "hidden warning");
    }
    tracker.shutdown();

    let contents = fs::read_to_string(path).unwrap();
    assert!(contents.contains(":INFO: mapped 3 slots"));
    assert!(!contents.contains("hidden"));
}

#[test]
fn bad_filter_is_an_error() {
    let config = TrackersConfig {
        stdout: TrackerConfig {
            enable: true,
            level: log::Level::Info,
            filter_regex: "[",
            file: None,
        },
        log_file: TrackerConfig {
            enable: false,
            ..TrackerConfig::default()
        },
    };
    assert!(setup_trackers(&config).is_err());
}

#[test]
fn log_file_needs_a_name() {
    let config = TrackersConfig {
        stdout: TrackerConfig {
            enable: false,
            ..TrackerConfig::default()
        },
        log_file: TrackerConfig {
            enable: true,
            ..TrackerConfig::default()
        },
    };
    assert!(setup_trackers(&config).is_err());
}
