// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The hop-distance device.
//!
//! Every device keeps the length of the shortest path to it from the source
//! found so far and tells its neighbours whenever that improves. The host
//! starts the run by sending distance 0 to the source.

use mesh_runtime::device::{Device, Pin};
use serde::{Deserialize, Serialize};

/// Distance of a device no path has reached.
pub const UNREACHED: u32 = u32::MAX;

/// Where a message came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// A distance set by the host.
    #[default]
    Host,
    /// The distance of the neighbour at the other end of the edge.
    Neighbour,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopDistance {
    pub dist: u32,

    /// Number of `step` calls before the device is done.
    pub rounds: u32,
    pub round: u32,
}

impl Default for HopDistance {
    fn default() -> Self {
        Self {
            dist: UNREACHED,
            rounds: 1,
            round: 0,
        }
    }
}

impl HopDistance {
    #[must_use]
    pub fn with_rounds(rounds: u32) -> Self {
        Self {
            rounds,
            ..Self::default()
        }
    }
}

impl Device for HopDistance {
    type Edge = Origin;
    type Message = u32;

    fn init(&mut self, _pin: &mut Pin) {}

    fn send(&mut self, msg: &mut u32, pin: &mut Pin) {
        *msg = self.dist;
        *pin = Pin::No;
    }

    fn recv(&mut self, msg: &u32, origin: &Origin, pin: &mut Pin) {
        let dist = match origin {
            Origin::Host => *msg,
            Origin::Neighbour => msg.saturating_add(1),
        };
        if dist < self.dist {
            self.dist = dist;
            *pin = Pin::App(0);
        }
    }

    fn step(&mut self, _pin: &mut Pin) -> bool {
        self.round += 1;
        self.round < self.rounds
    }

    fn finish(&mut self, msg: &mut u32) -> bool {
        *msg = self.dist;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_shortest_distance() {
        let mut device = HopDistance::default();
        let mut pin = Pin::No;
        device.recv(&4, &Origin::Neighbour, &mut pin);
        assert_eq!((device.dist, pin), (5, Pin::App(0)));

        let mut pin = Pin::No;
        device.recv(&7, &Origin::Neighbour, &mut pin);
        assert_eq!((device.dist, pin), (5, Pin::No));

        device.recv(&0, &Origin::Host, &mut pin);
        assert_eq!((device.dist, pin), (0, Pin::App(0)));

        let mut msg = 0;
        device.send(&mut msg, &mut pin);
        assert_eq!((msg, pin), (0, Pin::No));
    }

    #[test]
    fn unreached_neighbours_do_not_wrap() {
        let mut device = HopDistance::default();
        let mut pin = Pin::No;
        device.recv(&UNREACHED, &Origin::Neighbour, &mut pin);
        assert_eq!((device.dist, pin), (UNREACHED, Pin::No));
    }

    #[test]
    fn steps_for_the_given_rounds() {
        let mut device = HopDistance::with_rounds(3);
        let mut pin = Pin::No;
        assert!(device.step(&mut pin));
        assert!(device.step(&mut pin));
        assert!(!device.step(&mut pin));
    }
}
