use std::sync::Arc;

use mumexml::Tag;
use tracing::{debug, trace, warn};

use crate::coords::RoomCoords;
use crate::error::MapError;
use crate::index::RoomIndex;
use crate::source::MapSource;

/// Like MMapper's path machine, minus the path: an exact name+description
/// lookup per room seen.
pub struct PathResolver<S> {
    index: Arc<RoomIndex<S>>,
    room_name: Option<String>,
    here: Option<RoomCoords>,
}

impl<S: MapSource> PathResolver<S> {
    pub fn new(index: Arc<RoomIndex<S>>) -> Self {
        Self {
            index,
            room_name: None,
            here: None,
        }
    }

    /// Last position found, if any.
    pub fn here(&self) -> Option<RoomCoords> {
        self.here
    }

    /// Puts the player somewhere without seeing a room, like the web
    /// client's `#x,y,z` link. Forgets any half-seen room.
    pub fn set_here(&mut self, at: RoomCoords) {
        self.room_name = None;
        self.here = Some(at);
    }

    /// Feeds one closed tag. Returns the new position once a full room
    /// (name then description) has been seen and found in the index.
    pub async fn process_tag(&mut self, tag: &Tag) -> Result<Option<RoomCoords>, MapError> {
        trace!(tag = %tag.name, "path resolver");
        match tag.name.as_str() {
            "name" => self.room_name = Some(tag.text.clone()),
            "room" => self.room_name = None,
            "description" => {
                let name = self.room_name.take().filter(|n| !n.is_empty());
                let Some(name) = name else {
                    return Err(MapError::DescriptionWithoutName {
                        desc: tag.text.clone(),
                    });
                };
                return Ok(self.enter_room(&name, &tag.text).await);
            }
            _ => {}
        }
        Ok(None)
    }

    async fn enter_room(&mut self, name: &str, desc: &str) -> Option<RoomCoords> {
        let found = match self.index.find_pos_by_name_desc(name, desc).await {
            Ok(found) => found,
            Err(e) => {
                warn!(room = name, err = %e, "room index lookup failed");
                return None;
            }
        };
        // No path to disambiguate with: take the first.
        let first = *found.first()?;
        if found.len() > 1 {
            debug!(room = name, candidates = found.len(), "ambiguous room, taking the first");
        }
        self.here = Some(first);
        Some(first)
    }
}
