// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! Backends that run a mesh application without boards.
//!
//! - [`FabricBackend`](crate::emulator::FabricBackend) boots the heap images
//!   built by the mapper into emulated slots and runs the real interpreter on
//!   each, over a [fabric](crate::fabric) with random message latency.
//! - [`SoftSim`](crate::soft::SoftSim) skips placement and mapping and runs
//!   the devices of a graph directly.
//!
//! Both run on a worker thread and hand host-bound messages to the caller
//! through a [`HostQueue`](mesh_hostlink::queue::HostQueue), so the same
//! [`HostLink`](mesh_hostlink::hostlink::HostLink) code drives either of them
//! or real boards.
//!
//! Trackers are not `Send`, so the worker builds its own from a
//! [`TrackerFactory`]:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use mesh_sim::TrackerFactory;
//! use mesh_track::tracker::dev_null_tracker;
//!
//! let factory: TrackerFactory = Arc::new(dev_null_tracker);
//! let _tracker = factory();
//! ```

use std::sync::Arc;

use mesh_track::Tracker;

pub mod delay;
pub mod emulator;
pub mod fabric;
pub mod soft;

/// Builds the tracker of a worker thread.
pub type TrackerFactory = Arc<dyn Fn() -> Tracker + Send + Sync>;
