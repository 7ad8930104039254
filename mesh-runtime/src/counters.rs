// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Per-slot performance counters.

/// Thread counter keys in the order they are reported to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCounter {
    SendHandlerCalls = 0,
    TotalSendHandlerTime = 1,
    BlockedSends = 2,
    MsgsSent = 3,
    MsgsRecv = 4,
    TotalRecvHandlerTime = 5,
    MinBarrierActive = 6,
    SumBarrierActiveDiv256 = 7,
    MaxBarrierActive = 8,
}

impl ThreadCounter {
    pub const ALL: [ThreadCounter; 9] = [
        ThreadCounter::SendHandlerCalls,
        ThreadCounter::TotalSendHandlerTime,
        ThreadCounter::BlockedSends,
        ThreadCounter::MsgsSent,
        ThreadCounter::MsgsRecv,
        ThreadCounter::TotalRecvHandlerTime,
        ThreadCounter::MinBarrierActive,
        ThreadCounter::SumBarrierActiveDiv256,
        ThreadCounter::MaxBarrierActive,
    ];

    #[must_use]
    pub fn key(&self) -> u32 {
        *self as u32
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotCounters {
    pub send_handler_calls: u64,
    pub send_handler_ticks: u64,
    pub blocked_sends: u64,
    pub msgs_sent: u64,
    pub msgs_recv: u64,
    pub recv_handler_ticks: u64,

    /// Completed time steps, synchronized discipline only.
    pub steps: u64,
    pub min_step_ticks: Option<u64>,
    pub max_step_ticks: u64,
    pub sum_step_ticks: u64,

    /// Messages that reached a retired device and were dropped. Not reported
    /// to the host.
    pub dropped: u64,
}

impl SlotCounters {
    pub fn record_step(&mut self, ticks: u64) {
        self.steps += 1;
        self.min_step_ticks = Some(self.min_step_ticks.map_or(ticks, |m| m.min(ticks)));
        self.max_step_ticks = self.max_step_ticks.max(ticks);
        self.sum_step_ticks += ticks;
    }

    /// Value reported for `counter`. Counters are 32 bits wide on the wire
    /// and saturate.
    #[must_use]
    pub fn value(&self, counter: ThreadCounter) -> u32 {
        let value = match counter {
            ThreadCounter::SendHandlerCalls => self.send_handler_calls,
            ThreadCounter::TotalSendHandlerTime => self.send_handler_ticks,
            ThreadCounter::BlockedSends => self.blocked_sends,
            ThreadCounter::MsgsSent => self.msgs_sent,
            ThreadCounter::MsgsRecv => self.msgs_recv,
            ThreadCounter::TotalRecvHandlerTime => self.recv_handler_ticks,
            ThreadCounter::MinBarrierActive => self.min_step_ticks.unwrap_or(0),
            ThreadCounter::SumBarrierActiveDiv256 => self.sum_step_ticks >> 8,
            ThreadCounter::MaxBarrierActive => self.max_step_ticks,
        };
        u32::try_from(value).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_statistics() {
        let mut counters = SlotCounters::default();
        assert_eq!(counters.value(ThreadCounter::MinBarrierActive), 0);

        counters.record_step(300);
        counters.record_step(100);
        counters.record_step(500);
        assert_eq!(counters.steps, 3);
        assert_eq!(counters.value(ThreadCounter::MinBarrierActive), 100);
        assert_eq!(counters.value(ThreadCounter::MaxBarrierActive), 500);
        assert_eq!(counters.value(ThreadCounter::SumBarrierActiveDiv256), 900 >> 8);
    }

    #[test]
    fn wide_values_saturate() {
        let counters = SlotCounters {
            msgs_sent: 1 << 40,
            ..SlotCounters::default()
        };
        assert_eq!(counters.value(ThreadCounter::MsgsSent), u32::MAX);
    }
}
