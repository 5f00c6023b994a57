//! Movement path codec.
//!
//! A movement packet carries a starting position/velocity followed by a list
//! of segments. Each segment starts with an attribute byte that selects one
//! of seven shapes; the shape decides which fields follow on the wire and
//! what the segment changes when applied to an entity.

use crate::core::packet::{u8_count, PacketReader, PacketWriter};
use crate::error::Result;

/// Attribute that makes a normal segment carry an extra fall-start foothold.
const ATTR_NORMAL_WITH_FALL: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Point {
    pub x: i16,
    pub y: i16,
}

impl Point {
    pub const fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    fn read(r: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self {
            x: r.i16()?,
            y: r.i16()?,
        })
    }

    fn write(&self, w: &mut PacketWriter) {
        w.i16(self.x).i16(self.y);
    }
}

/// Segment shape selected by the attribute byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Normal,
    Jump,
    Teleport,
    StatChange,
    StartFallDown,
    FlyingBlock,
    GenericAction,
}

pub fn move_kind_from_attr(attr: u8) -> MoveKind {
    match attr {
        0 | 5 | 12 | 14 | 35 | 36 => MoveKind::Normal,
        1 | 2 | 13 | 16 | 18 | 31 | 32 | 33 | 34 => MoveKind::Jump,
        3 | 4 | 6 | 7 | 8 | 10 => MoveKind::Teleport,
        9 => MoveKind::StatChange,
        11 => MoveKind::StartFallDown,
        17 => MoveKind::FlyingBlock,
        _ => MoveKind::GenericAction,
    }
}

/// Trailer shared by every shape except stat changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Motion {
    pub action: u8,
    pub elapse: i16,
}

impl Motion {
    fn read(r: &mut PacketReader<'_>) -> Result<Self> {
        Ok(Self {
            action: r.u8()?,
            elapse: r.i16()?,
        })
    }

    fn write(&self, w: &mut PacketWriter) {
        w.u8(self.action).i16(self.elapse);
    }
}

/// One movement segment. Fields marked "inherited" are not on the wire; they
/// are copied from the path's starting values while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveElem {
    Normal {
        attr: u8,
        pos: Point,
        velocity: Point,
        foothold: i16,
        /// Present only for attribute 12.
        fall_start: Option<i16>,
        offset: Point,
        motion: Motion,
    },
    Jump {
        attr: u8,
        /// inherited
        pos: Point,
        velocity: Point,
        motion: Motion,
    },
    Teleport {
        attr: u8,
        pos: Point,
        foothold: i16,
        motion: Motion,
    },
    StatChange {
        attr: u8,
        stat: u8,
    },
    StartFallDown {
        attr: u8,
        /// inherited
        pos: Point,
        velocity: Point,
        fall_start: i16,
        motion: Motion,
    },
    FlyingBlock {
        attr: u8,
        pos: Point,
        velocity: Point,
        motion: Motion,
    },
    GenericAction {
        attr: u8,
        /// inherited
        pos: Point,
        /// inherited
        velocity: Point,
        motion: Motion,
    },
}

impl MoveElem {
    pub fn attr(&self) -> u8 {
        match self {
            MoveElem::Normal { attr, .. }
            | MoveElem::Jump { attr, .. }
            | MoveElem::Teleport { attr, .. }
            | MoveElem::StatChange { attr, .. }
            | MoveElem::StartFallDown { attr, .. }
            | MoveElem::FlyingBlock { attr, .. }
            | MoveElem::GenericAction { attr, .. } => *attr,
        }
    }

    pub fn kind(&self) -> MoveKind {
        move_kind_from_attr(self.attr())
    }

    pub fn motion(&self) -> Option<Motion> {
        match self {
            MoveElem::StatChange { .. } => None,
            MoveElem::Normal { motion, .. }
            | MoveElem::Jump { motion, .. }
            | MoveElem::Teleport { motion, .. }
            | MoveElem::StartFallDown { motion, .. }
            | MoveElem::FlyingBlock { motion, .. }
            | MoveElem::GenericAction { motion, .. } => Some(*motion),
        }
    }

    fn decode(r: &mut PacketReader<'_>, start: Point, start_velocity: Point) -> Result<Self> {
        let attr = r.u8()?;
        let elem = match move_kind_from_attr(attr) {
            MoveKind::Normal => {
                let pos = Point::read(r)?;
                let velocity = Point::read(r)?;
                let foothold = r.i16()?;
                let fall_start = if attr == ATTR_NORMAL_WITH_FALL {
                    Some(r.i16()?)
                } else {
                    None
                };
                let offset = Point::read(r)?;
                MoveElem::Normal {
                    attr,
                    pos,
                    velocity,
                    foothold,
                    fall_start,
                    offset,
                    motion: Motion::read(r)?,
                }
            }
            MoveKind::Jump => MoveElem::Jump {
                attr,
                pos: start,
                velocity: Point::read(r)?,
                motion: Motion::read(r)?,
            },
            MoveKind::Teleport => MoveElem::Teleport {
                attr,
                pos: Point::read(r)?,
                foothold: r.i16()?,
                motion: Motion::read(r)?,
            },
            MoveKind::StatChange => MoveElem::StatChange { attr, stat: r.u8()? },
            MoveKind::StartFallDown => MoveElem::StartFallDown {
                attr,
                pos: start,
                velocity: Point::read(r)?,
                fall_start: r.i16()?,
                motion: Motion::read(r)?,
            },
            MoveKind::FlyingBlock => MoveElem::FlyingBlock {
                attr,
                pos: Point::read(r)?,
                velocity: Point::read(r)?,
                motion: Motion::read(r)?,
            },
            MoveKind::GenericAction => MoveElem::GenericAction {
                attr,
                pos: start,
                velocity: start_velocity,
                motion: Motion::read(r)?,
            },
        };
        Ok(elem)
    }

    fn encode(&self, w: &mut PacketWriter) {
        w.u8(self.attr());
        match self {
            MoveElem::Normal {
                attr,
                pos,
                velocity,
                foothold,
                fall_start,
                offset,
                motion,
            } => {
                pos.write(w);
                velocity.write(w);
                w.i16(*foothold);
                if *attr == ATTR_NORMAL_WITH_FALL {
                    w.i16(fall_start.unwrap_or_default());
                }
                offset.write(w);
                motion.write(w);
            }
            MoveElem::Jump {
                velocity, motion, ..
            } => {
                velocity.write(w);
                motion.write(w);
            }
            MoveElem::Teleport {
                pos,
                foothold,
                motion,
                ..
            } => {
                pos.write(w);
                w.i16(*foothold);
                motion.write(w);
            }
            MoveElem::StatChange { stat, .. } => {
                w.u8(*stat);
            }
            MoveElem::StartFallDown {
                velocity,
                fall_start,
                motion,
                ..
            } => {
                velocity.write(w);
                w.i16(*fall_start);
                motion.write(w);
            }
            MoveElem::FlyingBlock {
                pos,
                velocity,
                motion,
                ..
            } => {
                pos.write(w);
                velocity.write(w);
                motion.write(w);
            }
            MoveElem::GenericAction { motion, .. } => {
                motion.write(w);
            }
        }
    }

    /// Apply this segment to a moving entity.
    pub fn apply_to<M: Movable + ?Sized>(&self, target: &mut M) {
        match self {
            MoveElem::Normal { pos, foothold, .. } | MoveElem::Teleport { pos, foothold, .. } => {
                target.set_position(*pos);
                target.set_foothold(*foothold);
            }
            MoveElem::Jump { pos, .. }
            | MoveElem::StartFallDown { pos, .. }
            | MoveElem::FlyingBlock { pos, .. } => {
                target.set_position(*pos);
            }
            MoveElem::StatChange { .. } | MoveElem::GenericAction { .. } => {}
        }
        if let Some(motion) = self.motion() {
            target.set_move_action(motion.action);
        }
    }
}

/// Anything a movement path can be applied to.
pub trait Movable {
    fn set_position(&mut self, pos: Point);
    fn set_foothold(&mut self, foothold: i16);
    fn set_move_action(&mut self, action: u8);
}

/// Decoded movement packet body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MovePath {
    pub start: Point,
    pub start_velocity: Point,
    pub elems: Vec<MoveElem>,
}

impl MovePath {
    pub fn decode(r: &mut PacketReader<'_>) -> Result<Self> {
        let start = Point::read(r)?;
        let start_velocity = Point::read(r)?;
        let count = r.u8()? as usize;
        let mut elems = Vec::with_capacity(count);
        for _ in 0..count {
            elems.push(MoveElem::decode(r, start, start_velocity)?);
        }
        Ok(Self {
            start,
            start_velocity,
            elems,
        })
    }

    pub fn encode(&self, w: &mut PacketWriter) {
        self.start.write(w);
        self.start_velocity.write(w);
        let count = u8_count(self.elems.len());
        w.u8(count);
        for elem in self.elems.iter().take(usize::from(count)) {
            elem.encode(w);
        }
    }

    pub fn apply_to<M: Movable + ?Sized>(&self, target: &mut M) {
        for elem in &self.elems {
            elem.apply_to(target);
        }
    }

    /// Total elapsed time in milliseconds.
    pub fn duration(&self) -> i32 {
        self.elems
            .iter()
            .filter_map(MoveElem::motion)
            .map(|m| m.elapse as i32)
            .sum()
    }
}
