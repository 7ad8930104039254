// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Collecting the performance counters that slots report at the end of a run.
//!
//! Each counter arrives as one line of text, `NAME:thread,group,key,value`
//! with the numbers in hex. The [`PerfCounterAccumulator`] knows how many
//! counters a mesh of a given size reports, so the caller can tell when
//! collection is complete.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Write;

use mesh_config::settings::MeshDims;
use mesh_engine::sim_error;
use mesh_engine::types::SimError;
use mesh_graph::address::{BOARD_SHIFT, CORE_SHIFT, MAILBOX_SHIFT, all_slots};
use mesh_runtime::counters::{SlotCounters, ThreadCounter};

pub const THREAD_COUNTERS: usize = ThreadCounter::ALL.len();
pub const CORE_COUNTERS: usize = 4;
pub const CACHE_COUNTERS: usize = 3;
pub const BOARD_COUNTERS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    Device,
    Thread,
    Core,
    Cache,
    Board,
}

impl Category {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Device => "DPC",
            Self::Thread => "ThPC",
            Self::Core => "CoPC",
            Self::Cache => "CaPC",
            Self::Board => "BoPC",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "DPC" => Self::Device,
            "ThPC" => Self::Thread,
            "CoPC" => Self::Core,
            "CaPC" => Self::Cache,
            "BoPC" => Self::Board,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterLine {
    pub category: Category,
    pub thread: u32,

    /// Device offset within the thread for device counters, otherwise 0.
    pub group: u32,
    pub key: u32,
    pub value: u32,
}

impl CounterLine {
    /// Parse a counter line. Returns `None` for anything else a slot might
    /// print, including unknown counter names.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let (name, fields) = line.trim_end().split_once(':')?;
        let category = Category::from_name(name)?;
        let mut numbers = fields.split(',').map(|f| u32::from_str_radix(f.trim(), 16));
        let mut next = || numbers.next()?.ok();
        let line = Self {
            category,
            thread: next()?,
            group: next()?,
            key: next()?,
            value: next()?,
        };
        match numbers.next() {
            Some(_) => None,
            None => Some(line),
        }
    }

    /// The thread counter lines of one slot.
    #[must_use]
    pub fn for_thread(thread: u32, counters: &SlotCounters) -> Vec<Self> {
        ThreadCounter::ALL
            .iter()
            .map(|&counter| Self {
                category: Category::Thread,
                thread,
                group: 0,
                key: counter.key(),
                value: counters.value(counter),
            })
            .collect()
    }

    /// The core counter lines of the core whose first thread is `thread`.
    #[must_use]
    pub fn for_core(thread: u32, cycles: u64, idle: u64) -> Vec<Self> {
        [cycles >> 32, cycles, idle >> 32, idle]
            .into_iter()
            .enumerate()
            .map(|(key, value)| Self {
                category: Category::Core,
                thread,
                group: 0,
                key: key as u32,
                value: value as u32,
            })
            .collect()
    }

    #[must_use]
    pub fn for_values(category: Category, thread: u32, values: &[u32]) -> Vec<Self> {
        values
            .iter()
            .enumerate()
            .map(|(key, &value)| Self {
                category,
                thread,
                group: 0,
                key: key as u32,
                value,
            })
            .collect()
    }
}

impl fmt::Display for CounterLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:x},{:x},{:x},{:x}",
            self.category.name(),
            self.thread,
            self.group,
            self.key,
            self.value
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Counters<const N: usize> {
    /// Thread id of the first thread covered by these counters.
    pub id: u32,
    pub values: [Option<u32>; N],
}

impl<const N: usize> Counters<N> {
    fn new(id: u32) -> Self {
        Self {
            id,
            values: [None; N],
        }
    }

    #[must_use]
    pub fn get(&self, key: usize) -> Option<u32> {
        self.values.get(key).copied().flatten()
    }

    /// Join a high and a low word.
    #[must_use]
    pub fn wide(&self, hi: usize, lo: usize) -> Option<u64> {
        Some((u64::from(self.get(hi)?) << 32) | u64::from(self.get(lo)?))
    }

    fn set(&mut self, key: u32, value: u32) -> Result<(), SimError> {
        match self.values.get_mut(key as usize) {
            None => sim_error!(format!("counter key {key} of 0x{:x} out of range", self.id)),
            Some(Some(_)) => sim_error!(format!(
                "duplicate counter key {key} received for 0x{:x}",
                self.id
            )),
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
        }
    }
}

pub type ThreadCounters = Counters<THREAD_COUNTERS>;
pub type CoreCounters = Counters<CORE_COUNTERS>;
pub type CacheCounters = Counters<CACHE_COUNTERS>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoardCounters {
    pub board_x: u32,
    pub board_y: u32,
    pub counters: Counters<BOARD_COUNTERS>,
}

/// Everything known about one thread.
#[derive(Clone, Copy, Debug)]
pub struct CombinedThread<'a> {
    pub thread: &'a ThreadCounters,
    pub core: &'a CoreCounters,
    pub cache: &'a CacheCounters,
    pub board: &'a BoardCounters,
}

const CORE_MASK: u32 = !((1 << CORE_SHIFT) - 1);
const CACHE_MASK: u32 = !((1 << MAILBOX_SHIFT) - 1);
const BOARD_MASK: u32 = !((1 << BOARD_SHIFT) - 1);

/// Accumulates the counter lines of one run.
pub struct PerfCounterAccumulator {
    threads: BTreeMap<u32, ThreadCounters>,
    cores: HashMap<u32, CoreCounters>,
    caches: HashMap<u32, CacheCounters>,
    boards: HashMap<u32, BoardCounters>,
    devices: BTreeMap<(u32, u32, u32), u32>,
    received: usize,
    expected: usize,
}

impl PerfCounterAccumulator {
    /// Expect thread, core, cache and board counters from every slot of a
    /// mesh.
    #[must_use]
    pub fn new(dims: &MeshDims) -> Self {
        let mut acc = Self {
            threads: BTreeMap::new(),
            cores: HashMap::new(),
            caches: HashMap::new(),
            boards: HashMap::new(),
            devices: BTreeMap::new(),
            received: 0,
            expected: 0,
        };
        for slot in all_slots(dims) {
            let Ok(id) = slot.encode() else {
                continue;
            };
            acc.threads.insert(id, Counters::new(id));
            acc.expected += THREAD_COUNTERS;
            if id & !CORE_MASK == 0 {
                acc.cores.insert(id, Counters::new(id));
                acc.expected += CORE_COUNTERS;
            }
            if id & !CACHE_MASK == 0 {
                acc.caches.insert(id, Counters::new(id));
                acc.expected += CACHE_COUNTERS;
            }
            if id & !BOARD_MASK == 0 {
                acc.boards.insert(
                    id,
                    BoardCounters {
                        board_x: slot.board_x,
                        board_y: slot.board_y,
                        counters: Counters::new(id),
                    },
                );
                acc.expected += BOARD_COUNTERS;
            }
        }
        acc
    }

    /// Also expect `count` device counter lines.
    pub fn expect_device_counters(&mut self, count: usize) {
        self.expected += count;
    }

    /// Take one line printed by `thread_id`. Returns whether it was a counter.
    pub fn process_line(&mut self, thread_id: u32, line: &str) -> Result<bool, SimError> {
        let Some(counter) = CounterLine::parse(line) else {
            return Ok(false);
        };
        if counter.thread != thread_id {
            return sim_error!(format!(
                "perf counters: line '{}' for thread 0x{:x} was printed by thread 0x{thread_id:x}",
                line.trim_end(),
                counter.thread
            ));
        }
        self.add(&counter)
            .map_err(|e| SimError(format!("perf counters: {}", e.0)))?;
        self.received += 1;
        Ok(true)
    }

    fn add(&mut self, line: &CounterLine) -> Result<(), SimError> {
        let thread = line.thread;
        let unexpected = || SimError(format!("unexpected {} counter", line.category.name()));
        match line.category {
            Category::Device => {
                let key = (thread, line.group, line.key);
                if self.devices.insert(key, line.value).is_some() {
                    return sim_error!(format!(
                        "duplicate device counter {} of device {} on 0x{thread:x}",
                        line.key, line.group
                    ));
                }
                Ok(())
            }
            Category::Thread => self
                .threads
                .get_mut(&thread)
                .ok_or_else(unexpected)?
                .set(line.key, line.value),
            Category::Core => self
                .cores
                .get_mut(&thread)
                .ok_or_else(unexpected)?
                .set(line.key, line.value),
            Category::Cache => self
                .caches
                .get_mut(&thread)
                .ok_or_else(unexpected)?
                .set(line.key, line.value),
            Category::Board => self
                .boards
                .get_mut(&thread)
                .ok_or_else(unexpected)?
                .counters
                .set(line.key, line.value),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received == self.expected
    }

    #[must_use]
    pub fn received(&self) -> usize {
        self.received
    }

    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    #[must_use]
    pub fn thread(&self, thread_id: u32) -> Option<&ThreadCounters> {
        self.threads.get(&thread_id)
    }

    /// Counter `key` of device `group` on `thread_id`.
    #[must_use]
    pub fn device(&self, thread_id: u32, group: u32, key: u32) -> Option<u32> {
        self.devices.get(&(thread_id, group, key)).copied()
    }

    /// Core counters of the core running `thread_id`.
    #[must_use]
    pub fn core(&self, thread_id: u32) -> Option<&CoreCounters> {
        self.cores.get(&(thread_id & CORE_MASK))
    }

    #[must_use]
    pub fn combined_thread(&self, thread_id: u32) -> Option<CombinedThread<'_>> {
        Some(CombinedThread {
            thread: self.threads.get(&thread_id)?,
            core: self.cores.get(&(thread_id & CORE_MASK))?,
            cache: self.caches.get(&(thread_id & CACHE_MASK))?,
            board: self.boards.get(&(thread_id & BOARD_MASK))?,
        })
    }

    /// Sum of a thread counter over every thread that reported it.
    #[must_use]
    pub fn total(&self, counter: ThreadCounter) -> u64 {
        self.threads
            .values()
            .filter_map(|t| t.get(counter.key() as usize))
            .map(u64::from)
            .sum()
    }

    /// One CSV row per thread.
    pub fn write_thread_csv(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            out,
            "ThreadId,CoreId,CacheId,BoardId,BoardX,BoardY,\
             boProgRouterSent,boProgRouterSentInter,\
             caHitCount,caMissCount,caWritebackCount,coCycleCount,coIdleCount,\
             thSendHandlerCalls,thSendHandlerTime,thMessagesSent,thBlockedSends,\
             thMessagesRecv,thRecvHandlerTime,\
             thMinBarrierActive,thSumBarrierActive,thMaxBarrierActive"
        )?;
        let field = |value: Option<u32>| value.map_or(String::new(), |v| v.to_string());
        let wide = |value: Option<u64>| value.map_or(String::new(), |v| v.to_string());
        for &id in self.threads.keys() {
            let Some(c) = self.combined_thread(id) else {
                continue;
            };
            let th = |counter: ThreadCounter| c.thread.get(counter.key() as usize);
            let sum = th(ThreadCounter::SumBarrierActiveDiv256).map(|v| u64::from(v) * 256);
            writeln!(
                out,
                "{id},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
                c.core.id,
                c.cache.id,
                c.board.counters.id,
                c.board.board_x,
                c.board.board_y,
                field(c.board.counters.get(0)),
                field(c.board.counters.get(1)),
                field(c.cache.get(0)),
                field(c.cache.get(1)),
                field(c.cache.get(2)),
                wide(c.core.wide(0, 1)),
                wide(c.core.wide(2, 3)),
                field(th(ThreadCounter::SendHandlerCalls)),
                field(th(ThreadCounter::TotalSendHandlerTime)),
                field(th(ThreadCounter::MsgsSent)),
                field(th(ThreadCounter::BlockedSends)),
                field(th(ThreadCounter::MsgsRecv)),
                field(th(ThreadCounter::TotalRecvHandlerTime)),
                field(th(ThreadCounter::MinBarrierActive)),
                wide(sum),
                field(th(ThreadCounter::MaxBarrierActive)),
            )?;
        }
        Ok(())
    }
}
