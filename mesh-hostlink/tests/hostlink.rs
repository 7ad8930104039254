// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::io::Write;

use mesh_config::settings::MeshDims;
use mesh_engine::test_helpers::start_test;
use mesh_engine::types::{SimError, SimResult};
use mesh_graph::address::SlotAddress;
use mesh_hostlink::backend::Backend;
use mesh_hostlink::counters::PerfCounterAccumulator;
use mesh_hostlink::hostlink::HostLink;
use mesh_hostlink::memfile::MemFile;
use mesh_hostlink::queue::HostQueue;
use mesh_mapper::image::HeapImage;
use mesh_runtime::message::{FLAG_HOST, MsgHeader, NO_EDGE};

/// Answers every message sent to it by echoing it back at go.
#[derive(Default)]
struct Echo {
    queue: HostQueue,
    booted: usize,
    sent: Vec<(SlotAddress, Vec<u8>)>,
}

impl Backend for Echo {
    fn boot(&mut self, images: &[HeapImage]) -> SimResult {
        self.booted += images.len();
        Ok(())
    }

    fn go(&mut self) -> SimResult {
        for (_, msg) in &self.sent {
            self.queue.push(msg.clone())?;
        }
        self.queue.finish()
    }

    fn send(&mut self, slot: SlotAddress, msg: &[u8]) -> SimResult {
        self.sent.push((slot, msg.to_vec()));
        Ok(())
    }

    fn queue(&self) -> &HostQueue {
        &self.queue
    }

    fn counter_lines(&mut self) -> Result<Vec<(u32, String)>, SimError> {
        Ok(vec![(0, "ThPC:0,0,3,2".to_string()), (0, "done".to_string())])
    }
}

fn from_device(device: u32, payload: &[u8]) -> Vec<u8> {
    MsgHeader {
        device,
        edge: NO_EDGE,
        stamp: 0,
        flags: FLAG_HOST,
    }
    .frame(payload)
}

#[test]
fn calls_must_come_in_order() {
    let engine = start_test(file!());
    let mut host = HostLink::new(engine.top(), Echo::default());
    assert_eq!(
        host.go().unwrap_err().to_string(),
        "Error: top::hostlink: go before boot"
    );
    assert!(host.send(SlotAddress::default(), &[]).is_err());
    assert!(host.recv().is_err());

    host.boot(&[]).unwrap();
    assert_eq!(
        host.boot(&[]).unwrap_err().to_string(),
        "Error: top::hostlink: already booted"
    );
    host.go().unwrap();
    assert!(host.go().is_err());
    assert_eq!(host.recv().unwrap(), None);
}

#[test]
fn messages_are_checked_against_their_type() {
    let engine = start_test(file!());
    let mut host = HostLink::new(engine.top(), Echo::default());
    host.boot(&[]).unwrap();
    host.send(SlotAddress::default(), &from_device(3, &11u32.to_le_bytes())).unwrap();
    host.send(SlotAddress::default(), &from_device(4, &12u64.to_le_bytes())).unwrap();
    host.go().unwrap();

    let first = host.recv_msg::<u32>().unwrap().unwrap();
    assert_eq!((first.device, first.msg), (3, 11));
    assert_eq!(
        host.recv_msg::<u32>().unwrap_err().to_string(),
        "Error: top::hostlink: expected 20 byte messages, received 24 bytes"
    );
    assert_eq!(host.num_received(), 2);
}

#[test]
fn counters_are_collected() {
    let engine = start_test(file!());
    let mut host = HostLink::new(engine.top(), Echo::default());
    let dims = MeshDims {
        mailboxes_x: 1,
        mailboxes_y: 1,
        cores_per_mailbox: 1,
        threads_per_core: 1,
        log_bytes_per_partition: 17,
        ..MeshDims::default()
    };
    let mut acc = PerfCounterAccumulator::new(&dims);
    assert!(host.collect_counters(&mut acc).is_err());

    host.boot(&[]).unwrap();
    host.go().unwrap();
    host.collect_counters(&mut acc).unwrap();
    assert_eq!(acc.received(), 1);
    assert!(!acc.is_complete());
}

#[test]
fn memory_files_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "@00000000\n13 00 00 00 6F 00 00 00").unwrap();
    let mem = MemFile::read(file.path()).unwrap();
    assert_eq!(mem.words(), [(0, 0x13), (4, 0x6f)]);

    let missing = file.path().with_extension("missing");
    assert!(MemFile::read(&missing).is_err());
}
