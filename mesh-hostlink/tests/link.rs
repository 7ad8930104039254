// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};

use mesh_config::settings::MeshDims;
use mesh_engine::test_helpers::start_test;
use mesh_graph::address::SlotAddress;
use mesh_hostlink::backend::Backend;
use mesh_hostlink::control::{BROADCAST_CORE, Channel, ControlPacket, DebugCmd, DebugReply};
use mesh_hostlink::counters::PerfCounterAccumulator;
use mesh_hostlink::hostlink::{HostLink, HostMessage};
use mesh_hostlink::link::{Link, LinkBackend};
use mesh_hostlink::wire::{BootCmd, BootReq, Frame};
use mesh_mapper::image::HeapImage;
use mesh_mapper::pgraph::DeviceAddr;
use mesh_runtime::message::{FLAG_HOST, MsgHeader, NO_EDGE};

/// One board, one core, two threads.
fn dims() -> MeshDims {
    MeshDims {
        mailboxes_x: 1,
        mailboxes_y: 1,
        cores_per_mailbox: 1,
        threads_per_core: 2,
        log_bytes_per_partition: 17,
        ..MeshDims::default()
    }
}

fn link(stream: &UnixStream) -> Link {
    Link {
        rx: Box::new(stream.try_clone().unwrap()),
        tx: Box::new(stream.try_clone().unwrap()),
    }
}

/// What the board saw.
#[derive(Default)]
struct BoardLog {
    boot: Vec<(u32, BootReq)>,
    control: Vec<DebugCmd>,
    injected: Vec<Frame>,
}

/// Plays the part of a board: acknowledges `Start`, waits to be released,
/// then reports one message and prints a counter line before hanging up.
fn fake_board(mut data: UnixStream, mut control: UnixStream) -> JoinHandle<BoardLog> {
    thread::spawn(move || {
        let mut log = BoardLog::default();
        loop {
            let frame = Frame::read_from(&mut data).unwrap().unwrap();
            let req = BootReq::from_payload(&frame.payload).unwrap();
            let start = req.cmd == BootCmd::Start;
            log.boot.push((frame.dest, req));
            if start {
                Frame::new(frame.dest, &[]).unwrap().write_to(&mut data).unwrap();
                break;
            }
        }

        while log.control.last() != Some(&DebugCmd::StdIn(0)) {
            let packet = ControlPacket::read_from(&mut control).unwrap().unwrap();
            log.control.push(DebugCmd::from_bytes(&packet.payload).unwrap());
        }
        log.injected.push(Frame::read_from(&mut data).unwrap().unwrap());

        let header = MsgHeader {
            device: 5,
            edge: NO_EDGE,
            stamp: 3,
            flags: FLAG_HOST,
        };
        let msg = header.frame(&7u32.to_le_bytes());
        Frame::new(0, &msg).unwrap().write_to(&mut data).unwrap();

        for &byte in b"ThPC:1,0,3,2a\nhello" {
            let reply = DebugReply::StdOut {
                thread: 1,
                core: 0,
                byte,
            };
            let packet = ControlPacket {
                link_id: 0,
                channel: Channel::Uart,
                payload: reply.to_bytes(),
            };
            control.write_all(&packet.to_bytes().unwrap()).unwrap();
        }
        log
    })
}

#[test]
fn boot_go_and_collect() {
    let engine = start_test(file!());
    let (host_data, board_data) = UnixStream::pair().unwrap();
    let (host_control, board_control) = UnixStream::pair().unwrap();
    let board = fake_board(board_data, board_control);

    let backend =
        LinkBackend::new(engine.top(), dims(), link(&host_data), vec![link(&host_control)])
            .unwrap();
    let mut host = HostLink::new(engine.top(), backend);

    let slot = SlotAddress {
        thread: 1,
        ..SlotAddress::default()
    };
    let image = HeapImage {
        slot,
        heap_base: 0x8000_0000,
        bytes: (0..20u8).collect(),
    };
    host.boot(&[image]).unwrap();
    host.send_to_device(DeviceAddr { slot, local: 2 }, &9u32).unwrap();
    host.go().unwrap();

    let msg = host.recv_msg::<u32>().unwrap();
    assert_eq!(
        msg,
        Some(HostMessage {
            device: 5,
            stamp: 3,
            msg: 7
        })
    );

    let log = board.join().unwrap();
    assert_eq!(host.recv().unwrap(), None);

    // Twenty bytes are five words in one store.
    let cmds: Vec<BootCmd> = log.boot.iter().map(|(_, req)| req.cmd).collect();
    assert_eq!(cmds, [BootCmd::SetAddr, BootCmd::Store, BootCmd::Start]);
    assert_eq!(log.boot[0].1.args, [0x8000_0000]);
    assert_eq!(log.boot[1].1.args.len(), 5);
    assert_eq!(log.boot[2].1.args, [1]);
    assert!(log.boot.iter().all(|(dest, _)| *dest == 0));

    assert_eq!(log.injected.len(), 1);
    assert_eq!(log.injected[0].dest, 1);

    assert_eq!(
        log.control,
        [
            DebugCmd::SetDest {
                thread: 0,
                core: BROADCAST_CORE
            },
            DebugCmd::StdIn(0)
        ]
    );

    let lines = host.backend_mut().counter_lines().unwrap();
    assert_eq!(
        lines,
        [(1, "ThPC:1,0,3,2a".to_string()), (1, "hello".to_string())]
    );

    let mut acc = PerfCounterAccumulator::new(&dims());
    for (thread, line) in &lines {
        acc.process_line(*thread, line).unwrap();
    }
    assert_eq!(acc.received(), 1);
    assert_eq!(acc.thread(1).and_then(|t| t.get(3)), Some(42));
}

#[test]
fn missing_acknowledgement() {
    let engine = start_test(file!());
    let (host_data, board_data) = UnixStream::pair().unwrap();
    let (host_control, _board_control) = UnixStream::pair().unwrap();
    drop(board_data);

    let mut backend =
        LinkBackend::new(engine.top(), dims(), link(&host_data), vec![link(&host_control)])
            .unwrap();
    let err = backend.boot(&[]).unwrap_err();
    assert!(
        err.to_string()
            .ends_with("data link closed after 0 of 1 start acknowledgements")
            || err.to_string().contains("Broken pipe"),
        "{err}"
    );
}

#[test]
fn one_control_link_per_board() {
    let engine = start_test(file!());
    let (host_data, _board_data) = UnixStream::pair().unwrap();
    let result = LinkBackend::new(engine.top(), dims(), link(&host_data), Vec::new());
    assert_eq!(
        result.err().unwrap().to_string(),
        "Error: top::link: 0 control links for 1 boards"
    );
}
