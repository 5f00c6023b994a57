//! Movement path codec: every segment shape survives encode/decode.

#![allow(clippy::unwrap_used)]

use legacy_gameserver::core::packet::PacketWriter;
use legacy_gameserver::protocol::movement::{Motion, MoveElem, MovePath, Point};
use proptest::prelude::*;

const START: Point = Point { x: -120, y: 340 };
const START_VELOCITY: Point = Point { x: 15, y: -3 };

fn motion(action: u8, elapse: i16) -> Motion {
    Motion { action, elapse }
}

fn roundtrip(path: &MovePath) -> MovePath {
    let mut w = PacketWriter::new(0x29);
    path.encode(&mut w);
    let packet = w.build();
    let mut r = packet.reader();
    let decoded = MovePath::decode(&mut r).unwrap();
    assert_eq!(r.remaining(), 0, "decoder must consume exactly what was written");
    decoded
}

fn one_of_each() -> Vec<MoveElem> {
    vec![
        MoveElem::Normal {
            attr: 0,
            pos: Point::new(10, 20),
            velocity: Point::new(1, 2),
            foothold: 33,
            fall_start: None,
            offset: Point::new(-1, 0),
            motion: motion(2, 90),
        },
        MoveElem::Normal {
            attr: 12,
            pos: Point::new(11, 21),
            velocity: Point::new(0, 400),
            foothold: 34,
            fall_start: Some(35),
            offset: Point::new(0, 0),
            motion: motion(3, 60),
        },
        MoveElem::Jump {
            attr: 1,
            pos: START,
            velocity: Point::new(0, -550),
            motion: motion(6, 120),
        },
        MoveElem::Teleport {
            attr: 3,
            pos: Point::new(500, -40),
            foothold: 7,
            motion: motion(4, 0),
        },
        MoveElem::StatChange { attr: 9, stat: 1 },
        MoveElem::StartFallDown {
            attr: 11,
            pos: START,
            velocity: Point::new(0, 200),
            fall_start: 12,
            motion: motion(5, 30),
        },
        MoveElem::FlyingBlock {
            attr: 17,
            pos: Point::new(-7, -8),
            velocity: Point::new(9, 10),
            motion: motion(1, 15),
        },
        MoveElem::GenericAction {
            attr: 20,
            pos: START,
            velocity: START_VELOCITY,
            motion: motion(8, 45),
        },
    ]
}

#[test]
fn each_variant_roundtrips_alone() {
    for elem in one_of_each() {
        let path = MovePath {
            start: START,
            start_velocity: START_VELOCITY,
            elems: vec![elem.clone()],
        };
        assert_eq!(roundtrip(&path), path, "variant {:?}", elem.kind());
    }
}

#[test]
fn mixed_path_roundtrips_and_sums_duration() {
    let path = MovePath {
        start: START,
        start_velocity: START_VELOCITY,
        elems: one_of_each(),
    };
    let decoded = roundtrip(&path);
    assert_eq!(decoded, path);
    assert_eq!(decoded.duration(), 90 + 60 + 120 + 30 + 15 + 45);
}

proptest! {
    #[test]
    fn prop_teleport_paths_roundtrip(
        points in prop::collection::vec((any::<i16>(), any::<i16>(), any::<i16>(), any::<u8>(), any::<i16>()), 0..20),
        sx in any::<i16>(),
        sy in any::<i16>(),
    ) {
        let path = MovePath {
            start: Point::new(sx, sy),
            start_velocity: Point::default(),
            elems: points
                .into_iter()
                .map(|(x, y, fh, action, elapse)| MoveElem::Teleport {
                    attr: 3,
                    pos: Point::new(x, y),
                    foothold: fh,
                    motion: motion(action, elapse),
                })
                .collect(),
        };
        prop_assert_eq!(roundtrip(&path), path);
    }
}
