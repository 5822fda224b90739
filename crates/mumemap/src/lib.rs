//! `mumemap`: locate the player on the MUME world map.
//!
//! The map is hosted as static JSON next to the web client (`mapdata/v1/`):
//! - `arda.json`: global bounds ([`MapMetaData`]),
//! - `roomindex/<xx>.json`: name+description hash => coordinates, split by the
//!   first two hex digits of the hash ([`RoomIndex`]),
//! - `zone/<x>,<y>.json`: rooms of one 20x20 zone ([`ZoneStore`]).
//!
//! Everything is fetched on first use and cached for the rest of the run.
//! [`PathResolver`] turns closed `mumexml` tags into positions and
//! [`MapSession`] wires the parser, the resolver and the caches together.

pub mod coords;
pub mod error;
pub mod index;
pub mod meta;
pub mod normalize;
pub mod path;
pub mod room;
pub mod session;
pub mod source;
pub mod spatial;
pub mod zone;

pub use coords::{ParseCoordsError, RoomCoords};
pub use error::{FetchError, MapError};
pub use index::{RoomIndex, hash_name_desc};
pub use meta::MapMetaData;
pub use path::PathResolver;
pub use room::{Dir, Room, RoomData, RoomExit, RoomId};
pub use session::{MapEvent, MapSession, SessionOutput, TrackerConfig, WorldMap};
pub use source::{DirSource, HttpSource, MapSource};
pub use spatial::SpatialIndex;
pub use zone::{ZONE_SIZE, ZoneKey, ZoneStore};
