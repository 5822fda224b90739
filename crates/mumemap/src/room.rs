use std::sync::Arc;

use serde::Deserialize;

use crate::coords::RoomCoords;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u32);

/// Exit indices into [`RoomData::exits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Dir {
    North = 0,
    South = 1,
    East = 2,
    West = 3,
    Up = 4,
    Down = 5,
}

impl Dir {
    pub const ALL: [Dir; 6] = [Dir::North, Dir::South, Dir::East, Dir::West, Dir::Up, Dir::Down];

    pub fn as_str(self) -> &'static str {
        match self {
            Dir::North => "north",
            Dir::South => "south",
            Dir::East => "east",
            Dir::West => "west",
            Dir::Up => "up",
            Dir::Down => "down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomExit {
    pub name: String,
    pub dflags: u32,
    pub flags: u32,
    #[serde(rename = "in")]
    pub in_: Vec<RoomId>,
    pub out: Vec<RoomId>,
}

impl RoomExit {
    pub fn is_open(&self) -> bool {
        !self.out.is_empty()
    }
}

/// One room as stored in `zone/<x>,<y>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomData {
    pub name: String,
    pub desc: String,
    pub id: RoomId,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub exits: [RoomExit; 6],
    pub sector: u32,
    pub loadflags: u64,
    pub mobflags: u64,
}

pub(crate) const REQUIRED: &[&str] = &[
    "name",
    "desc",
    "id",
    "x",
    "y",
    "z",
    "exits",
    "sector",
    "loadflags",
    "mobflags",
];

/// A cached room. Clones share the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    data: Arc<RoomData>,
}

impl Room {
    pub fn new(data: RoomData) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    pub fn data(&self) -> &RoomData {
        &self.data
    }

    pub fn coords(&self) -> RoomCoords {
        RoomCoords::new(self.data.x, self.data.y, self.data.z)
    }

    pub fn exit(&self, dir: Dir) -> &RoomExit {
        &self.data.exits[dir as usize]
    }
}

#[cfg(test)]
pub(crate) fn room_json(id: u32, x: i32, y: i32, z: i32, name: &str) -> serde_json::Value {
    let exit = serde_json::json!({"name": "", "dflags": 0, "flags": 0, "in": [], "out": []});
    serde_json::json!({
        "name": name,
        "desc": format!("Room {id}.\n"),
        "id": id,
        "x": x,
        "y": y,
        "z": z,
        "exits": [exit, exit, exit, exit, exit, exit],
        "sector": 3,
        "loadflags": 0,
        "mobflags": 0,
    })
}
