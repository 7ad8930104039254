// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Trackers built from the logging settings of a run.

use std::sync::Arc;

use mesh_config::settings::LogConfig;
use mesh_sim::TrackerFactory;
use mesh_track::Tracker;
use mesh_track::builder::{TrackerConfig, TrackersConfig, setup_trackers};
use mesh_track::tracker::{TrackConfigError, stdout_tracker};

/// The tracker of the main thread: stdout and, if configured, a log file.
pub fn setup(log: &LogConfig) -> Result<Tracker, TrackConfigError> {
    let config = TrackersConfig {
        stdout: TrackerConfig {
            enable: true,
            level: log.stdout_level,
            filter_regex: &log.stdout_filter_regex,
            file: None,
        },
        log_file: TrackerConfig {
            enable: log.log_file.is_some(),
            level: log.log_file_level,
            filter_regex: "",
            file: log.log_file.as_deref(),
        },
    };
    setup_trackers(&config)
}

/// Trackers for backend worker threads. They log to stdout only; the log
/// file belongs to the main thread.
#[must_use]
pub fn worker_factory(log: &LogConfig) -> TrackerFactory {
    let level = log.stdout_level;
    let filter_regex = log.stdout_filter_regex.clone();
    Arc::new(move || {
        let config = TrackersConfig {
            stdout: TrackerConfig {
                enable: true,
                level,
                filter_regex: &filter_regex,
                file: None,
            },
            log_file: TrackerConfig {
                enable: false,
                ..TrackerConfig::default()
            },
        };
        // The same filter has already been accepted on the main thread.
        setup_trackers(&config).unwrap_or_else(|_| stdout_tracker(level))
    })
}
