// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::collections::BTreeSet;

use mesh_mapper::routing::{BEAT_BYTES, ProgRouterMesh, Record, RoutingDest, decode_beat};

fn mailbox_id(board_x: u32, board_y: u32, mailbox_x: u32, mailbox_y: u32) -> u32 {
    (board_y << 7) | (board_x << 4) | (mailbox_y << 2) | mailbox_x
}

#[test]
fn every_destination_is_reached_once() {
    let mut mesh = ProgRouterMesh::new(3, 3);
    let mut dests = Vec::new();
    for board_y in 0..3 {
        for board_x in 0..3 {
            for mailbox in 0..4 {
                dests.push(RoutingDest {
                    mailbox: mailbox_id(board_x, board_y, mailbox % 2, mailbox / 2),
                    key: 9,
                    threads: 1 << (board_x + 3 * board_y),
                });
            }
        }
    }

    let key = mesh.add_dests_from_board(1, 1, &dests).unwrap();
    let deliveries = mesh.resolve(1, 1, key).unwrap();
    assert_eq!(deliveries.len(), dests.len());

    let reached: BTreeSet<(u32, u32, u32, u32, u64)> = deliveries
        .iter()
        .map(|d| match d.record {
            Record::Mrm {
                mailbox_x,
                mailbox_y,
                threads,
                key,
            } => {
                assert_eq!(key, 9);
                (d.board_x, d.board_y, mailbox_x, mailbox_y, threads)
            }
            other => panic!("unexpected record {other:?}"),
        })
        .collect();
    let expected: BTreeSet<(u32, u32, u32, u32, u64)> = dests
        .iter()
        .map(|d| {
            let board_x = (d.mailbox >> 4) & 7;
            let board_y = d.mailbox >> 7;
            (board_x, board_y, d.mailbox & 3, (d.mailbox >> 2) & 3, d.threads)
        })
        .collect();
    assert_eq!(reached, expected);
}

#[test]
fn keys_alternate_between_rams() {
    let mut mesh = ProgRouterMesh::new(1, 1);
    let dest = [RoutingDest {
        mailbox: mailbox_id(0, 0, 1, 1),
        key: 0,
        threads: 0b11,
    }];
    let first = mesh.add_dests_from_board(0, 0, &dest).unwrap();
    let second = mesh.add_dests_from_board(0, 0, &dest).unwrap();
    assert_eq!(first >> 31, 0);
    assert_eq!(second >> 31, 1);

    let tables: Vec<_> = mesh.tables().collect();
    assert_eq!(tables.len(), 2);
    for (_, _, _, bytes) in tables {
        assert_eq!(decode_beat(&bytes[..BEAT_BYTES]).unwrap().len(), 1);
    }
}

#[test]
fn no_destinations() {
    let mut mesh = ProgRouterMesh::new(1, 1);
    assert!(mesh.add_dests_from_board(0, 0, &[]).is_err());
}

#[test]
fn sender_outside_mesh() {
    let mut mesh = ProgRouterMesh::new(1, 1);
    let dest = [RoutingDest {
        mailbox: mailbox_id(0, 0, 0, 0),
        key: 0,
        threads: 1,
    }];
    assert_eq!(
        mesh.add_dests_from_board(2, 0, &dest).unwrap_err().to_string(),
        "Error: no board (2, 0) in the mesh"
    );
}
