// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The contract between application devices and the interpreters.

use std::fmt;

use mesh_engine::sim_error;
use mesh_engine::types::SimError;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Which output a device wants to send on next.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Pin {
    /// Nothing to send.
    #[default]
    No,

    /// The next message goes to the host.
    Host,

    /// The next message is multicast to every edge on application pin `n`.
    App(u8),
}

impl Pin {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self != Pin::No
    }

    #[must_use]
    pub fn to_wire(&self) -> u32 {
        match self {
            Pin::No => 0,
            Pin::Host => 1,
            Pin::App(n) => u32::from(*n) + 2,
        }
    }

    pub fn from_wire(value: u32) -> Result<Self, SimError> {
        match value {
            0 => Ok(Pin::No),
            1 => Ok(Pin::Host),
            v if v - 2 <= u32::from(u8::MAX) => Ok(Pin::App((v - 2) as u8)),
            v => sim_error!(format!("pin value {v} out of range")),
        }
    }

    /// Pin table entry holding this pin's neighbours. Entry 0 is reserved for
    /// sync edges.
    #[must_use]
    pub fn table_entry(&self) -> Option<u32> {
        match self {
            Pin::App(n) => Some(u32::from(*n) + 1),
            _ => None,
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pin::No => write!(f, "no"),
            Pin::Host => write!(f, "host"),
            Pin::App(n) => write!(f, "pin{n}"),
        }
    }
}

/// An application device.
///
/// The device value is the device's state: it is serialized into the slot's
/// heap image by the mapper and restored by the slot before `init` runs.
/// Handlers never block and run to completion. A handler that wants to send
/// sets `pin`; the interpreter calls [`send`](Device::send) when the slot can
/// transmit.
///
/// Under the synchronized discipline `step` is called at the end of every
/// time step, once the device has sent on each of its pins and received one
/// message per incoming edge. Returning `false` retires the device. Under the
/// asynchronous discipline `step` is called whenever the whole mesh is idle,
/// and the run ends once every device returns `false`.
pub trait Device: Clone + Default + Serialize + DeserializeOwned + 'static {
    /// Label carried by every edge.
    type Edge: Clone + Default + Serialize + DeserializeOwned;

    /// Payload of every message.
    type Message: Clone + Default + Serialize + DeserializeOwned;

    fn init(&mut self, pin: &mut Pin);

    fn send(&mut self, msg: &mut Self::Message, pin: &mut Pin);

    fn recv(&mut self, msg: &Self::Message, edge: &Self::Edge, pin: &mut Pin);

    fn step(&mut self, pin: &mut Pin) -> bool;

    /// Called exactly once when the run ends. Returning `true` sends `msg` to
    /// the host.
    fn finish(&mut self, msg: &mut Self::Message) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values() {
        assert_eq!(Pin::No.to_wire(), 0);
        assert_eq!(Pin::Host.to_wire(), 1);
        assert_eq!(Pin::App(0).to_wire(), 2);
        assert_eq!(Pin::from_wire(7).unwrap(), Pin::App(5));
        assert_eq!(Pin::from_wire(257).unwrap(), Pin::App(255));
        assert!(Pin::from_wire(258).is_err());
    }

    #[test]
    fn app_pins_skip_the_sync_entry() {
        assert_eq!(Pin::App(0).table_entry(), Some(1));
        assert_eq!(Pin::Host.table_entry(), None);
        assert!(!Pin::No.is_ready());
    }
}
