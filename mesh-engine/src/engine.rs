// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The engine: a top-level entity, an executor and its clock.

use std::future::Future;
use std::rc::Rc;

use mesh_track::Tracker;
use mesh_track::entity::{Entity, toplevel};

use crate::executor::{self, Executor, Spawner};
use crate::time::clock::{Clock, ClockTick};
use crate::types::SimResult;

pub struct Engine {
    pub executor: Executor,
    pub spawner: Spawner,
    toplevel: Rc<Entity>,
}

impl Engine {
    /// Create a standalone engine.
    #[must_use]
    pub fn new(tracker: &Tracker) -> Self {
        let toplevel = toplevel(tracker, "top");
        let (executor, spawner) = executor::new_executor_and_spawner(&toplevel);
        Self {
            executor,
            spawner,
            toplevel,
        }
    }

    pub fn run(&mut self) -> SimResult {
        self.executor.run()
    }

    pub fn spawn(&self, future: impl Future<Output = SimResult> + 'static) {
        self.executor.spawn(future);
    }

    #[must_use]
    pub fn spawner(&self) -> Spawner {
        self.spawner.clone()
    }

    /// The clock shared by every task of the run.
    #[must_use]
    pub fn clock(&self) -> Clock {
        self.executor.clock()
    }

    #[must_use]
    pub fn now(&self) -> ClockTick {
        self.executor.clock().tick_now()
    }

    #[must_use]
    pub fn top(&self) -> &Rc<Entity> {
        &self.toplevel
    }
}
