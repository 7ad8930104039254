// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! Devices and the per-slot runtime that executes them.
//!
//! Applications implement [`Device`](crate::device::Device) once and can run
//! under either scheduling discipline. A slot restores its devices from a
//! heap image with [`SlotProgram::load`](crate::program::SlotProgram::load)
//! and runs them with an [`Interpreter`](crate::interp::Interpreter) against
//! whatever implements [`SlotOps`](crate::ops::SlotOps) for it.
//!
//! # A device
//!
//! ```rust
//! use mesh_runtime::device::{Device, Pin};
//! use serde::{Deserialize, Serialize};
//!
//! /// Sends its id once, then counts what it hears.
//! #[derive(Clone, Default, Serialize, Deserialize)]
//! struct Gossip {
//!     id: u32,
//!     heard: u32,
//! }
//!
//! impl Device for Gossip {
//!     type Edge = ();
//!     type Message = u32;
//!
//!     fn init(&mut self, pin: &mut Pin) {
//!         *pin = Pin::App(0);
//!     }
//!
//!     fn send(&mut self, msg: &mut u32, pin: &mut Pin) {
//!         *msg = self.id;
//!         *pin = Pin::No;
//!     }
//!
//!     fn recv(&mut self, _msg: &u32, _edge: &(), _pin: &mut Pin) {
//!         self.heard += 1;
//!     }
//!
//!     fn step(&mut self, _pin: &mut Pin) -> bool {
//!         false
//!     }
//!
//!     fn finish(&mut self, msg: &mut u32) -> bool {
//!         *msg = self.heard;
//!         true
//!     }
//! }
//!
//! let mut device = Gossip { id: 7, heard: 0 };
//! let mut pin = Pin::No;
//! device.init(&mut pin);
//! assert_eq!(pin, Pin::App(0));
//! ```

pub mod counters;
pub mod device;
pub mod interp;
pub mod message;
pub mod ops;
pub mod program;
