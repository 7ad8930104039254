// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Turn a graph of devices into what each slot of the mesh needs to run it.
//!
//! A [`PGraph`](crate::pgraph::PGraph) couples a graph with per-device state.
//! Mapping it places every device on a slot and resolves every edge into a
//! destination slot, a slot-local device index and a key into the
//! destination's incoming edge table. The result is one
//! [`HeapImage`](crate::image::HeapImage) per occupied slot, plus the
//! [programmable router](crate::routing) tables of each board.
//!
//! Under the synchronized discipline the mapper also adds sync edges so that
//! every device hears from each device it sends to at every step.

pub mod image;
pub mod layout;
pub mod pgraph;
pub mod routing;
