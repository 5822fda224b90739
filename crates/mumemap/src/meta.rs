use serde::Deserialize;

use crate::coords::RoomCoords;
use crate::error::MapError;

pub const META_PATH: &str = "arda.json";

/// Global bounds of the map, from `arda.json`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMetaData {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
    pub min_z: i32,
    pub max_z: i32,
    pub directions: Vec<i32>,
    pub rooms_count: u32,
}

const REQUIRED: &[&str] = &[
    "directions",
    "maxX",
    "maxY",
    "maxZ",
    "minX",
    "minY",
    "minZ",
    "roomsCount",
];

/// Keys from `required` that `v` lacks. Anything but an object lacks them all.
pub(crate) fn missing_keys(v: &serde_json::Value, required: &[&'static str]) -> Vec<&'static str> {
    match v.as_object() {
        Some(obj) => required
            .iter()
            .copied()
            .filter(|k| !obj.contains_key(*k))
            .collect(),
        None => required.to_vec(),
    }
}

impl MapMetaData {
    pub fn from_json(raw: &[u8]) -> Result<Self, MapError> {
        let json_err = |err| MapError::Json {
            path: META_PATH.to_string(),
            err,
        };
        let v: serde_json::Value = serde_json::from_slice(raw).map_err(json_err)?;
        let missing = missing_keys(&v, REQUIRED);
        if !missing.is_empty() {
            return Err(MapError::MissingFields {
                what: "map metadata".to_string(),
                fields: missing,
            });
        }
        serde_json::from_value(v).map_err(json_err)
    }

    pub fn contains(&self, c: RoomCoords) -> bool {
        (self.min_x..=self.max_x).contains(&c.x)
            && (self.min_y..=self.max_y).contains(&c.y)
            && (self.min_z..=self.max_z).contains(&c.z)
    }
}
