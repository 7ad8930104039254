// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! What a [`HostLink`](crate::hostlink::HostLink) needs from the thing that
//! actually runs the slots.

use mesh_engine::types::{SimError, SimResult};
use mesh_graph::address::SlotAddress;
use mesh_mapper::image::HeapImage;

use crate::memfile::MemFile;
use crate::queue::HostQueue;

pub trait Backend {
    /// Load program code and initial data before any heap image.
    ///
    /// Backends that interpret devices themselves ignore them.
    fn load_program(&mut self, _code: &MemFile, _data: &MemFile) -> SimResult {
        Ok(())
    }

    /// Copy every heap image into its slot's memory.
    fn boot(&mut self, images: &[HeapImage]) -> SimResult;

    /// Start every slot.
    fn go(&mut self) -> SimResult;

    /// Inject a framed message into a slot.
    fn send(&mut self, slot: SlotAddress, msg: &[u8]) -> SimResult;

    /// Messages travelling to the host. The queue finishes once the mesh has
    /// terminated.
    fn queue(&self) -> &HostQueue;

    /// Counter lines with the thread that printed each one. Waits for the
    /// run to end.
    fn counter_lines(&mut self) -> Result<Vec<(u32, String)>, SimError>;
}
