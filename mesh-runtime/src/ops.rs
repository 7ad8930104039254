// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! What an interpreter needs from the slot it runs on.

use std::ops::BitOr;

use async_trait::async_trait;
use mesh_engine::types::SimResult;
use mesh_graph::address::SlotAddress;

/// Conditions a slot can sleep on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WakeupCond(u8);

impl WakeupCond {
    pub const CAN_SEND: Self = Self(1);
    pub const CAN_RECV: Self = Self(2);

    #[must_use]
    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for WakeupCond {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Result of voting in the global idle detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleStatus {
    /// A message arrived before the mesh became idle.
    NotIdle,

    /// The mesh is idle but at least one slot voted to continue.
    Idle,

    /// The mesh is idle and every slot voted to stop.
    Done,
}

/// Operations of one execution slot.
///
/// Messages are complete frames: a
/// [`MsgHeader`](crate::message::MsgHeader) followed by the payload.
#[async_trait(?Send)]
pub trait SlotOps {
    fn address(&self) -> SlotAddress;

    /// Cycles elapsed on this slot.
    fn ticks(&self) -> u64;

    fn can_send(&self) -> bool;

    fn can_recv(&self) -> bool;

    /// Send to the slot with packed address `dest`. Only valid while
    /// [`can_send`](SlotOps::can_send) holds.
    fn send(&self, dest: u32, msg: Vec<u8>) -> SimResult;

    /// Send to the host. Only valid while [`can_send`](SlotOps::can_send)
    /// holds.
    fn send_host(&self, msg: Vec<u8>) -> SimResult;

    /// Next received message, if any.
    fn recv(&self) -> Option<Vec<u8>>;

    /// Sleep until any of the conditions in `cond` holds.
    async fn wait_until(&self, cond: WakeupCond);

    /// Let one cycle pass.
    async fn tick(&self);

    /// Wait until either a message arrives or the whole mesh is idle. A slot
    /// may only call this with nothing left to send.
    async fn idle(&self, vote: bool) -> IdleStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_combine() {
        let both = WakeupCond::CAN_SEND | WakeupCond::CAN_RECV;
        assert!(both.contains(WakeupCond::CAN_RECV));
        assert!(!WakeupCond::CAN_SEND.contains(WakeupCond::CAN_RECV));
    }
}
