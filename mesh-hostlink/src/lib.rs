// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

#![doc(test(attr(warn(unused))))]

//! The host side of a mesh run.
//!
//! A [`HostLink`](crate::hostlink::HostLink) boots heap images into the
//! slots, releases them, injects messages and collects what the devices send
//! back. It does so through a [`Backend`](crate::backend::Backend): either
//! boards reached over byte streams ([`LinkBackend`](crate::link::LinkBackend))
//! or an emulator.
//!
//! Host-bound messages are buffered in a [`HostQueue`](crate::queue::HostQueue)
//! so that blocking receives on the caller's thread never race whatever
//! produces them.
//!
//! ```rust
//! use mesh_hostlink::queue::HostQueue;
//!
//! let queue = HostQueue::new();
//! queue.push(vec![1, 2, 3]).unwrap();
//! queue.finish().unwrap();
//! assert_eq!(queue.recv().unwrap(), Some(vec![1, 2, 3]));
//! assert_eq!(queue.recv().unwrap(), None);
//! ```

pub mod backend;
pub mod control;
pub mod counters;
pub mod hostlink;
pub mod link;
pub mod memfile;
pub mod queue;
pub mod wire;
