// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use mesh_config::settings::MeshDims;
use mesh_graph::address::{SlotAddress, all_slots};
use mesh_hostlink::counters::{Category, CounterLine, PerfCounterAccumulator};
use mesh_runtime::counters::{SlotCounters, ThreadCounter};

/// One board of two mailboxes with two cores of two threads each.
fn dims() -> MeshDims {
    MeshDims {
        mailboxes_x: 2,
        mailboxes_y: 1,
        cores_per_mailbox: 2,
        threads_per_core: 2,
        log_bytes_per_partition: 17,
        ..MeshDims::default()
    }
}

/// Every line a complete run of `dims` reports.
fn all_lines(dims: &MeshDims) -> Vec<CounterLine> {
    let mut lines = Vec::new();
    for slot in all_slots(dims) {
        let id = slot.encode().unwrap();
        let counters = SlotCounters {
            msgs_sent: u64::from(id) + 1,
            ..SlotCounters::default()
        };
        lines.extend(CounterLine::for_thread(id, &counters));
        if slot.thread == 0 {
            lines.extend(CounterLine::for_core(id, 1000 + u64::from(id), 10));
        }
        if slot.thread == 0 && slot.core == 0 {
            lines.extend(CounterLine::for_values(Category::Cache, id, &[5, 6, 7]));
        }
        if id == 0 {
            lines.extend(CounterLine::for_values(Category::Board, id, &[100, 20]));
        }
    }
    lines
}

#[test]
fn complete_run() {
    let dims = dims();
    let mut acc = PerfCounterAccumulator::new(&dims);
    // 8 threads, 4 cores, 2 caches, 1 board.
    assert_eq!(acc.expected(), 8 * 9 + 4 * 4 + 2 * 3 + 2);

    for line in all_lines(&dims) {
        assert!(!acc.is_complete());
        assert!(acc.process_line(line.thread, &line.to_string()).unwrap());
    }
    assert!(acc.is_complete());
    let sent: u64 = all_slots(&dims)
        .iter()
        .map(|slot| u64::from(slot.encode().unwrap()) + 1)
        .sum();
    assert_eq!(acc.total(ThreadCounter::MsgsSent), sent);

    let thread = SlotAddress {
        mailbox_x: 1,
        core: 1,
        thread: 1,
        ..SlotAddress::default()
    }
    .encode()
    .unwrap();
    let combined = acc.combined_thread(thread).unwrap();
    assert_eq!(combined.core.id, thread - 1);
    assert_eq!(combined.core.wide(0, 1), Some(1000 + u64::from(thread - 1)));
    assert_eq!(combined.cache.id, 1 << 6);
    assert_eq!(combined.board.counters.get(1), Some(20));

    let mut csv = Vec::new();
    acc.write_thread_csv(&mut csv).unwrap();
    let csv = String::from_utf8(csv).unwrap();
    assert_eq!(csv.lines().count(), 9);
    assert!(csv.lines().nth(1).unwrap().starts_with("0,0,0,0,0,0,100,20,5,6,7,1000,10,"));
}

#[test]
fn duplicate_counter() {
    let mut acc = PerfCounterAccumulator::new(&dims());
    assert!(acc.process_line(0, "ThPC:0,0,4,1").unwrap());
    assert_eq!(
        acc.process_line(0, "ThPC:0,0,4,1").unwrap_err().to_string(),
        "Error: perf counters: duplicate counter key 4 received for 0x0"
    );
}

#[test]
fn wrong_thread() {
    let mut acc = PerfCounterAccumulator::new(&dims());
    assert_eq!(
        acc.process_line(2, "ThPC:1,0,4,1").unwrap_err().to_string(),
        "Error: perf counters: line 'ThPC:1,0,4,1' for thread 0x1 was printed by thread 0x2"
    );
}

#[test]
fn core_counters_only_on_first_thread() {
    let mut acc = PerfCounterAccumulator::new(&dims());
    assert_eq!(
        acc.process_line(1, "CoPC:1,0,0,1").unwrap_err().to_string(),
        "Error: perf counters: unexpected CoPC counter"
    );
}

#[test]
fn device_counters_are_expected_on_request() {
    let mut acc = PerfCounterAccumulator::new(&MeshDims {
        mailboxes_x: 1,
        mailboxes_y: 1,
        cores_per_mailbox: 1,
        threads_per_core: 1,
        log_bytes_per_partition: 17,
        ..MeshDims::default()
    });
    acc.expect_device_counters(1);
    assert_eq!(acc.expected(), 9 + 4 + 3 + 2 + 1);
    assert!(acc.process_line(0, "DPC:0,2,1,ff").unwrap());
    assert_eq!(acc.device(0, 2, 1), Some(255));
    assert!(acc.process_line(0, "DPC:0,2,1,ff").is_err());
    assert!(!acc.process_line(0, "not a counter").unwrap());
}
