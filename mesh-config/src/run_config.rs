// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The merged configuration of one run.

use std::path::{Path, PathBuf};

use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::ConfigError;
use crate::settings::{
    BackendKind, Discipline, LogConfig, MeshDims, PlacerConfig, PlacerMethod, SimConfig,
};

/// Prefix of the environment variables that override configuration values.
pub const ENV_PREFIX: &str = "MESH_";

#[derive(Parser, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[command(about = "Map an actor graph onto a compute mesh and run it.")]
pub struct RunConfig {
    /// Number of boards in the X dimension
    #[arg(long)]
    pub boards_x: Option<u32>,

    /// Number of boards in the Y dimension
    #[arg(long)]
    pub boards_y: Option<u32>,

    /// Number of mailboxes per board in the X dimension
    #[arg(long)]
    pub mailboxes_x: Option<u32>,

    /// Number of mailboxes per board in the Y dimension
    #[arg(long)]
    pub mailboxes_y: Option<u32>,

    /// Cores sharing each mailbox
    #[arg(long)]
    pub cores_per_mailbox: Option<u32>,

    /// Hardware threads per core
    #[arg(long)]
    pub threads_per_core: Option<u32>,

    /// Size of each thread's private DRAM partition (log 2 bytes)
    #[arg(long)]
    pub log_bytes_per_partition: Option<u32>,

    /// Placement method
    #[arg(long)]
    pub placer_method: Option<PlacerMethod>,

    /// Number of refinement passes made by the placer
    #[arg(long)]
    pub placer_effort: Option<u32>,

    /// Allowed partition imbalance as a fraction of the mean
    #[arg(long)]
    pub placer_tolerance: Option<f64>,

    /// Seed for all random number generators
    #[arg(long)]
    pub seed: Option<u64>,

    /// Scheduling discipline of the slot interpreters
    #[arg(long)]
    pub discipline: Option<Discipline>,

    /// Backend used to execute the graph
    #[arg(long)]
    pub backend: Option<BackendKind>,

    /// Probability parameter of the geometric message latency
    #[arg(long)]
    pub delay_probability: Option<f64>,

    /// Use random message latencies (otherwise one tick per message)
    #[arg(long)]
    pub deliver_out_of_order: Option<bool>,

    /// Maximum number of messages in flight across the mesh
    #[arg(long)]
    pub max_in_flight: Option<u32>,

    /// Level of log messages written to stdout
    #[arg(long)]
    pub stdout_level: Option<log::Level>,

    /// Only apply the stdout level to entities matching this regex
    #[arg(long)]
    pub stdout_filter_regex: Option<String>,

    /// Write a text log to this file
    #[arg(long)]
    pub log_file: Option<String>,

    /// Level of log messages written to the log file
    #[arg(long)]
    pub log_file_level: Option<log::Level>,

    /// Edge list file ("numNodes numEdges" header then "src dst" pairs)
    #[arg(long)]
    pub edges: Option<PathBuf>,

    /// Code memory image to load into every core
    #[arg(long)]
    pub code: Option<PathBuf>,

    /// Data memory image to load into every DRAM
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Side of the synthetic grid used when no edge list is given
    #[arg(long)]
    pub grid_size: Option<u32>,

    /// Device from which hop distances are measured
    #[arg(long)]
    pub source: Option<u32>,

    /// Number of time steps run under the synchronized discipline
    #[arg(long)]
    pub max_steps: Option<u32>,

    /// Path to additional configuration file
    ///
    /// This additional configuration file must contain TOML, and set values
    /// for fields of this struct.
    #[arg(long)]
    pub conf_file: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let dims = MeshDims::default();
        let placer = PlacerConfig::default();
        let sim = SimConfig::default();
        let log = LogConfig::default();
        Self {
            boards_x: Some(dims.boards_x),
            boards_y: Some(dims.boards_y),
            mailboxes_x: Some(dims.mailboxes_x),
            mailboxes_y: Some(dims.mailboxes_y),
            cores_per_mailbox: Some(dims.cores_per_mailbox),
            threads_per_core: Some(dims.threads_per_core),
            log_bytes_per_partition: Some(dims.log_bytes_per_partition),
            placer_method: Some(placer.method),
            placer_effort: Some(placer.effort),
            placer_tolerance: Some(placer.tolerance),
            seed: Some(placer.seed),
            discipline: Some(Discipline::default()),
            backend: Some(BackendKind::default()),
            delay_probability: Some(sim.delay_probability),
            deliver_out_of_order: Some(sim.deliver_out_of_order),
            max_in_flight: Some(sim.max_in_flight),
            stdout_level: Some(log.stdout_level),
            stdout_filter_regex: Some(log.stdout_filter_regex),
            log_file: Some(String::new()),
            log_file_level: Some(log.log_file_level),
            edges: Some(PathBuf::new()),
            code: Some(PathBuf::new()),
            data: Some(PathBuf::new()),
            grid_size: Some(16),
            source: Some(0),
            max_steps: Some(64),
            conf_file: Some(PathBuf::new()),
        }
    }
}

macro_rules! merge_set_fields {
    ($dst:ident, $src:ident ; $($field:ident),* $(,)?) => {
        $(
        if $src.$field.is_some() {
            $dst.$field = $src.$field;
        }
        )*
    };
}

fn check_conf_file(conf_file: &Path) -> Result<(), ConfigError> {
    if conf_file.is_dir() {
        return Err(ConfigError(format!(
            "{} is not a file path",
            conf_file.display()
        )));
    }
    if !conf_file.exists() {
        return Err(ConfigError(format!("{} not found", conf_file.display())));
    }
    Ok(())
}

fn non_empty(path: &Option<PathBuf>) -> Option<&Path> {
    path.as_deref().filter(|p| !p.as_os_str().is_empty())
}

impl RunConfig {
    /// Parse the command line and merge it with all other sources.
    pub fn parse_all_sources() -> Result<Self, ConfigError> {
        Self::from_sources(Self::parse())
    }

    /// Merge the defaults, the configuration file named by `cli` (if any),
    /// the environment and finally the values set in `cli`.
    pub fn from_sources(cli: RunConfig) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(RunConfig::default()));
        if let Some(conf_file) = non_empty(&cli.conf_file) {
            check_conf_file(conf_file)?;
            figment = figment.merge(Toml::file(conf_file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        let mut config: RunConfig = figment.extract()?;
        config.merge_set(cli);
        Ok(config)
    }

    /// Update this configuration with the values set in a TOML file.
    pub fn parse_extra_conf_file(&mut self, conf_file: &Path) -> Result<(), ConfigError> {
        if conf_file.as_os_str().is_empty() {
            return Ok(());
        }
        check_conf_file(conf_file)?;
        let extra: RunConfig = Figment::new()
            .merge(Serialized::defaults(RunConfig::none()))
            .merge(Toml::file(conf_file))
            .extract()?;
        self.merge_set(extra);
        Ok(())
    }

    /// A configuration with no values set.
    #[must_use]
    pub fn none() -> Self {
        Self::parse_from(["mesh"])
    }

    fn merge_set(&mut self, other: RunConfig) {
        merge_set_fields!(self, other ;
            boards_x, boards_y, mailboxes_x, mailboxes_y, cores_per_mailbox,
            threads_per_core, log_bytes_per_partition, placer_method, placer_effort,
            placer_tolerance, seed, discipline, backend, delay_probability,
            deliver_out_of_order, max_in_flight, stdout_level, stdout_filter_regex,
            log_file, log_file_level, edges, code, data, grid_size, source, max_steps,
            conf_file,
        );
    }

    /// The mesh dimensions, validated against the address field widths.
    pub fn dims(&self) -> Result<MeshDims, ConfigError> {
        let d = MeshDims::default();
        let dims = MeshDims {
            boards_x: self.boards_x.unwrap_or(d.boards_x),
            boards_y: self.boards_y.unwrap_or(d.boards_y),
            mailboxes_x: self.mailboxes_x.unwrap_or(d.mailboxes_x),
            mailboxes_y: self.mailboxes_y.unwrap_or(d.mailboxes_y),
            cores_per_mailbox: self.cores_per_mailbox.unwrap_or(d.cores_per_mailbox),
            threads_per_core: self.threads_per_core.unwrap_or(d.threads_per_core),
            log_bytes_per_partition: self
                .log_bytes_per_partition
                .unwrap_or(d.log_bytes_per_partition),
        };
        dims.validate()?;
        Ok(dims)
    }

    pub fn placer(&self) -> Result<PlacerConfig, ConfigError> {
        let d = PlacerConfig::default();
        let tolerance = self.placer_tolerance.unwrap_or(d.tolerance);
        if !(0.0..1.0).contains(&tolerance) {
            return Err(ConfigError(format!(
                "placer_tolerance must be in [0, 1), got {tolerance}"
            )));
        }
        Ok(PlacerConfig {
            method: self.placer_method.unwrap_or(d.method),
            effort: self.placer_effort.unwrap_or(d.effort),
            tolerance,
            seed: self.seed.unwrap_or(d.seed),
        })
    }

    pub fn sim(&self) -> Result<SimConfig, ConfigError> {
        let d = SimConfig::default();
        let delay_probability = self.delay_probability.unwrap_or(d.delay_probability);
        if !(delay_probability > 0.0 && delay_probability <= 1.0) {
            return Err(ConfigError(format!(
                "delay_probability must be in (0, 1], got {delay_probability}"
            )));
        }
        let max_in_flight = self.max_in_flight.unwrap_or(d.max_in_flight);
        if max_in_flight == 0 {
            return Err(ConfigError("max_in_flight must be at least 1".to_string()));
        }
        Ok(SimConfig {
            delay_probability,
            deliver_out_of_order: self.deliver_out_of_order.unwrap_or(d.deliver_out_of_order),
            max_in_flight,
            seed: self.seed.unwrap_or(d.seed),
        })
    }

    #[must_use]
    pub fn log(&self) -> LogConfig {
        let d = LogConfig::default();
        LogConfig {
            stdout_level: self.stdout_level.unwrap_or(d.stdout_level),
            stdout_filter_regex: self
                .stdout_filter_regex
                .clone()
                .unwrap_or(d.stdout_filter_regex),
            log_file: self.log_file.clone().filter(|f| !f.is_empty()),
            log_file_level: self.log_file_level.unwrap_or(d.log_file_level),
        }
    }

    #[must_use]
    pub fn discipline(&self) -> Discipline {
        self.discipline.unwrap_or_default()
    }

    #[must_use]
    pub fn backend(&self) -> BackendKind {
        self.backend.unwrap_or_default()
    }

    #[must_use]
    pub fn edges_file(&self) -> Option<&Path> {
        non_empty(&self.edges)
    }

    #[must_use]
    pub fn code_file(&self) -> Option<&Path> {
        non_empty(&self.code)
    }

    #[must_use]
    pub fn data_file(&self) -> Option<&Path> {
        non_empty(&self.data)
    }
}
