// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Hierarchical configuration for the mesh runtime.
//!
//! A [`RunConfig`](crate::run_config::RunConfig) is built from the following
//! sources, later sources taking priority over earlier ones:
//!  1. default values (see the `Default` implementation),
//!  1. a TOML configuration file (`--conf-file`),
//!  1. environment variables prefixed with `MESH_` (for example
//!     `MESH_BOARDS_X=2`),
//!  1. the command line.
//!
//! Every field is an `Option` so that partial sources can be merged. Once
//! merged, the configuration is split into the typed settings consumed by the
//! rest of the workspace ([`MeshDims`](crate::settings::MeshDims),
//! [`PlacerConfig`](crate::settings::PlacerConfig),
//! [`SimConfig`](crate::settings::SimConfig) and
//! [`LogConfig`](crate::settings::LogConfig)).
//!
//! ```
//! use clap::Parser;
//! use mesh_config::run_config::RunConfig;
//!
//! let cli = RunConfig::parse_from(["mesh-run", "--boards-x", "2"]);
//! let config = RunConfig::from_sources(cli).unwrap();
//! assert_eq!(config.dims().unwrap().boards_x, 2);
//! ```

pub mod error;
pub mod run_config;
pub mod settings;

pub use error::ConfigError;
