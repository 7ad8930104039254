// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Actor graphs and their placement onto a mesh.
//!
//! A [`Graph`](crate::graph::Graph) is built by user code one device and one
//! edge at a time. The [`Placer`](crate::placer::Placer) then assigns every
//! device to a [`SlotAddress`](crate::address::SlotAddress), splitting the
//! graph between boards, mailboxes and threads in turn.
//!
//! ```
//! use mesh_config::settings::{MeshDims, PlacerConfig};
//! use mesh_graph::graph::Graph;
//! use mesh_graph::placer::Placer;
//! use mesh_track::entity::toplevel;
//! use mesh_track::tracker::dev_null_tracker;
//!
//! let top = toplevel(&dev_null_tracker(), "top");
//! let mut graph: Graph<()> = Graph::new(&top, "ring", 1);
//! let devices: Vec<_> = (0..8).map(|_| graph.new_device()).collect();
//! for (i, &dev) in devices.iter().enumerate() {
//!     graph.add_edge(dev, 0, devices[(i + 1) % 8]).unwrap();
//! }
//!
//! let mut placer = Placer::new(&top, MeshDims::default(), PlacerConfig::default());
//! let placement = placer.place(&graph).unwrap();
//! assert!(devices.iter().all(|&d| placement.slot_of(d).is_some()));
//! ```

pub mod address;
pub mod edge_list;
pub mod graph;
pub mod placer;
