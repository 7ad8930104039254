// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The queue between whatever produces host-bound messages and the caller's
//! blocking receives.
//!
//! Producers run on their own thread. Once a producer calls
//! [`finish`](HostQueue::finish) (or [`fail`](HostQueue::fail)) no more
//! messages arrive, so a receive on an empty queue returns instead of
//! blocking forever.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use mesh_engine::types::SimError;

#[derive(Default)]
struct QueueState {
    messages: VecDeque<Vec<u8>>,
    finished: bool,
    error: Option<SimError>,
}

#[derive(Clone, Default)]
pub struct HostQueue {
    shared: Arc<(Mutex<QueueState>, Condvar)>,
}

impl HostQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, SimError> {
        self.shared
            .0
            .lock()
            .map_err(|_| SimError("host queue poisoned by a failed producer".to_string()))
    }

    pub fn push(&self, msg: Vec<u8>) -> Result<(), SimError> {
        self.lock()?.messages.push_back(msg);
        self.shared.1.notify_all();
        Ok(())
    }

    /// No more messages will be pushed.
    pub fn finish(&self) -> Result<(), SimError> {
        self.lock()?.finished = true;
        self.shared.1.notify_all();
        Ok(())
    }

    /// The producer stopped with an error. Receivers see it once the
    /// messages pushed before it have been taken.
    pub fn fail(&self, error: SimError) -> Result<(), SimError> {
        let mut state = self.lock()?;
        state.error.get_or_insert(error);
        state.finished = true;
        drop(state);
        self.shared.1.notify_all();
        Ok(())
    }

    /// Wait for the next message. Returns `None` once the queue is finished
    /// and empty.
    pub fn recv(&self) -> Result<Option<Vec<u8>>, SimError> {
        let mut state = self.lock()?;
        loop {
            if let Some(msg) = state.messages.pop_front() {
                return Ok(Some(msg));
            }
            if state.finished {
                return match &state.error {
                    Some(error) => Err(error.clone()),
                    None => Ok(None),
                };
            }
            state = self
                .shared
                .1
                .wait(state)
                .map_err(|_| SimError("host queue poisoned by a failed producer".to_string()))?;
        }
    }

    /// Take a message if one is waiting.
    pub fn try_recv(&self) -> Result<Option<Vec<u8>>, SimError> {
        let mut state = self.lock()?;
        match state.messages.pop_front() {
            Some(msg) => Ok(Some(msg)),
            None => match &state.error {
                Some(error) => Err(error.clone()),
                None => Ok(None),
            },
        }
    }

    pub fn is_finished(&self) -> Result<bool, SimError> {
        Ok(self.lock()?.finished)
    }
}
