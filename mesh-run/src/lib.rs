// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Measure hop distances across an actor graph on a compute mesh.
//!
//! The graph comes from an edge list (`--edges`) or is a square grid
//! (`--grid-size`). Every device learns its distance from the source device
//! (`--source`) by flooding, under either scheduling discipline, on either
//! backend. The run prints its statistics as `name:value` lines:
//!
//! ```text
//! devices:256
//! edges:960
//! ...
//! reached:256
//! sum_of_distances:3840
//! max_distance:30
//! ```
//!
//! Configuration is layered as described in [`mesh_config`]: defaults, then a
//! TOML file (`--conf-file`), then `MESH_` environment variables, then the
//! command line.

pub mod hops;
pub mod network;
pub mod runner;
pub mod trackers;
