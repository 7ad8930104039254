// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Typed settings handed to the rest of the workspace once all configuration
//! sources have been merged.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Width in bits of each board coordinate in a slot address.
pub const BOARD_BITS: u32 = 3;

/// Width in bits of each mailbox coordinate in a slot address.
pub const MAILBOX_BITS: u32 = 2;

/// Width in bits of the core index within a mailbox.
pub const CORE_BITS: u32 = 2;

/// Width in bits of the thread index within a core.
pub const THREAD_BITS: u32 = 4;

/// Each DRAM is shared by this many cores.
pub const CORES_PER_DRAM: u32 = 32;

/// Size of each DRAM in bytes (log 2).
pub const LOG_BYTES_PER_DRAM: u32 = 30;

const MIN_LOG_BYTES_PER_PARTITION: u32 = 17;

/// How devices are assigned to partitions at each level of the hierarchy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlacerMethod {
    /// Recursive bisection followed by cut-reducing refinement.
    #[default]
    Default,
    /// Balanced random assignment.
    Random,
    /// Contiguous blocks of device ids.
    Direct,
}

/// The scheduling discipline run by every slot interpreter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Discipline {
    /// Devices react to messages only, no barrier.
    #[default]
    Async,
    /// Devices advance in lock-step time steps.
    Sync,
}

/// Where the graph is executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Heap images booted into an emulated mesh of slots.
    #[default]
    Fabric,
    /// Graph-level software simulator without placement.
    Soft,
}

/// Dimensions of the mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshDims {
    pub boards_x: u32,
    pub boards_y: u32,
    pub mailboxes_x: u32,
    pub mailboxes_y: u32,
    pub cores_per_mailbox: u32,
    pub threads_per_core: u32,
    pub log_bytes_per_partition: u32,
}

impl Default for MeshDims {
    fn default() -> Self {
        Self {
            boards_x: 1,
            boards_y: 1,
            mailboxes_x: 4,
            mailboxes_y: 4,
            cores_per_mailbox: 4,
            threads_per_core: 16,
            log_bytes_per_partition: 20,
        }
    }
}

fn check_range(name: &str, value: u32, bits: u32) -> Result<(), ConfigError> {
    if value == 0 || value > (1 << bits) {
        return Err(ConfigError(format!(
            "{name} must be between 1 and {}, got {value}",
            1 << bits
        )));
    }
    Ok(())
}

impl MeshDims {
    /// Check that every dimension fits in its address field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("boards_x", self.boards_x, BOARD_BITS)?;
        check_range("boards_y", self.boards_y, BOARD_BITS)?;
        check_range("mailboxes_x", self.mailboxes_x, MAILBOX_BITS)?;
        check_range("mailboxes_y", self.mailboxes_y, MAILBOX_BITS)?;
        check_range("cores_per_mailbox", self.cores_per_mailbox, CORE_BITS)?;
        check_range("threads_per_core", self.threads_per_core, THREAD_BITS)?;

        let max_log = LOG_BYTES_PER_DRAM - (CORES_PER_DRAM << THREAD_BITS).ilog2();
        if !(MIN_LOG_BYTES_PER_PARTITION..=max_log).contains(&self.log_bytes_per_partition) {
            return Err(ConfigError(format!(
                "log_bytes_per_partition must be between {} and {max_log}, got {}",
                MIN_LOG_BYTES_PER_PARTITION, self.log_bytes_per_partition
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn num_boards(&self) -> u32 {
        self.boards_x * self.boards_y
    }

    #[must_use]
    pub fn mailboxes_per_board(&self) -> u32 {
        self.mailboxes_x * self.mailboxes_y
    }

    #[must_use]
    pub fn threads_per_mailbox(&self) -> u32 {
        self.cores_per_mailbox * self.threads_per_core
    }

    #[must_use]
    pub fn num_slots(&self) -> u32 {
        self.num_boards() * self.mailboxes_per_board() * self.threads_per_mailbox()
    }

    #[must_use]
    pub fn partition_bytes(&self) -> u32 {
        1 << self.log_bytes_per_partition
    }
}

/// Settings for the placer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlacerConfig {
    pub method: PlacerMethod,

    /// Number of refinement passes (and grid placement attempts).
    pub effort: u32,

    /// Allowed imbalance as a fraction of the mean part size.
    pub tolerance: f64,

    pub seed: u64,
}

impl Default for PlacerConfig {
    fn default() -> Self {
        Self {
            method: PlacerMethod::Default,
            effort: 8,
            tolerance: 0.1,
            seed: 1,
        }
    }
}

/// Settings for the simulated message transport.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimConfig {
    /// Parameter of the geometric latency distribution.
    pub delay_probability: f64,

    /// When false every message takes exactly one tick.
    pub deliver_out_of_order: bool,

    /// Credit limit on messages in flight across the whole mesh.
    pub max_in_flight: u32,

    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            delay_probability: 0.1,
            deliver_out_of_order: true,
            max_in_flight: 64,
            seed: 1,
        }
    }
}

/// Settings for the trackers.
#[derive(Clone, Debug, PartialEq)]
pub struct LogConfig {
    pub stdout_level: log::Level,
    pub stdout_filter_regex: String,

    /// Text log file, if any.
    pub log_file: Option<String>,
    pub log_file_level: log::Level,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            stdout_level: log::Level::Warn,
            stdout_filter_regex: String::new(),
            log_file: None,
            log_file_level: log::Level::Info,
        }
    }
}
