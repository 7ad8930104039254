// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The clock of a run and the futures used to wait on it.
//!
//! Time is counted in ticks of the one clock every slot shares.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// A number of ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTick(pub u64);

impl ClockTick {
    /// Get the tick count.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClockTick {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared state between futures using a Clock and the Clock itself.
struct ClockState {
    now: Cell<ClockTick>,

    /// Tasks waiting for a tick, one entry per distinct tick.
    waiting: RefCell<Vec<Vec<Waker>>>,

    /// The ticks matching `waiting`, kept in descending order so that the
    /// last entry is the next to be woken.
    waiting_ticks: RefCell<Vec<ClockTick>>,
}

impl ClockState {
    fn schedule(&self, tick: ClockTick, cx: &mut Context<'_>) {
        let mut waiting_ticks = self.waiting_ticks.borrow_mut();
        let mut waiting = self.waiting.borrow_mut();
        let waker = cx.waker().clone();
        match waiting_ticks.iter().position(|&x| x <= tick) {
            Some(index) if waiting_ticks[index] == tick => waiting[index].push(waker),
            Some(index) => {
                waiting_ticks.insert(index, tick);
                waiting.insert(index, vec![waker]);
            }
            None => {
                waiting_ticks.push(tick);
                waiting.push(vec![waker]);
            }
        }
    }
}

#[derive(Clone)]
pub struct Clock {
    state: Rc<ClockState>,
}

impl Clock {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(ClockState {
                now: Cell::new(ClockTick(0)),
                waiting: RefCell::new(Vec::new()),
                waiting_ticks: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Returns the current [ClockTick].
    #[must_use]
    pub fn tick_now(&self) -> ClockTick {
        self.state.now.get()
    }

    /// Returns a [ClockDelay] future which must be `await`ed to delay the
    /// given number of ticks.
    #[must_use = "Futures do nothing unless you `.await` or otherwise use them"]
    pub fn wait_ticks(&self, ticks: u64) -> ClockDelay {
        ClockDelay {
            state: self.state.clone(),
            until: ClockTick(self.tick_now().0 + ticks),
            scheduled: false,
        }
    }

    /// Move to the next tick anyone waits for and return their wakers.
    pub(crate) fn advance(&self) -> Option<(ClockTick, Vec<Waker>)> {
        let tick = self.state.waiting_ticks.borrow_mut().pop()?;
        let wakers = self.state.waiting.borrow_mut().pop()?;
        self.state.now.set(tick);
        Some((tick, wakers))
    }
}

/// Future returned by [`Clock::wait_ticks`].
pub struct ClockDelay {
    state: Rc<ClockState>,
    until: ClockTick,
    scheduled: bool,
}

impl Future for ClockDelay {
    type Output = ();
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.until <= self.state.now.get() {
            return Poll::Ready(());
        }
        if !self.scheduled {
            self.state.schedule(self.until, cx);
            self.scheduled = true;
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_waiting() {
        let clock = Clock::new();
        assert_eq!(clock.tick_now(), ClockTick(0));
        assert!(clock.advance().is_none());
    }
}
