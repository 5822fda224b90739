use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

use crate::coords::RoomCoords;
use crate::error::{FetchError, MapError};
use crate::meta::{META_PATH, MapMetaData, missing_keys};
use crate::room::{self, Room, RoomData};
use crate::source::MapSource;
use crate::spatial::SpatialIndex;

/// Arda is split into JSON files that wide (and that high).
pub const ZONE_SIZE: i32 = 20;

/// South-west corner of a zone, named like the file that holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneKey {
    pub x: i32,
    pub y: i32,
}

impl ZoneKey {
    pub fn of(c: RoomCoords) -> Self {
        Self {
            x: c.x - c.x.rem_euclid(ZONE_SIZE),
            y: c.y - c.y.rem_euclid(ZONE_SIZE),
        }
    }

    pub fn path(&self) -> String {
        format!("zone/{self}.json")
    }
}

impl std::fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

struct ZoneCache {
    rooms: SpatialIndex<Room>,
    cached: HashSet<ZoneKey>,
    /// Known not to exist on the server.
    missing: HashSet<ZoneKey>,
}

/// Rooms by coordinates, downloaded a zone at a time.
pub struct ZoneStore<S> {
    source: Arc<S>,
    meta: MapMetaData,
    cache: Mutex<ZoneCache>,
}

impl<S: MapSource> ZoneStore<S> {
    /// Fetches and validates the map metadata. Nothing works without it.
    pub async fn load(source: Arc<S>) -> Result<Self, MapError> {
        let raw = source
            .fetch(META_PATH)
            .await
            .map_err(|err| MapError::Fetch {
                path: META_PATH.to_string(),
                err,
            })?;
        let meta = MapMetaData::from_json(&raw)?;
        info!(rooms = meta.rooms_count, "map metadata loaded");
        Ok(Self::new(source, meta))
    }

    pub fn new(source: Arc<S>, meta: MapMetaData) -> Self {
        let cache = ZoneCache {
            rooms: SpatialIndex::new(&meta),
            cached: HashSet::new(),
            missing: HashSet::new(),
        };
        Self {
            source,
            meta,
            cache: Mutex::new(cache),
        }
    }

    pub fn meta(&self) -> &MapMetaData {
        &self.meta
    }

    /// The zone holding `c`, or None when `c` is off the map horizontally.
    pub fn zone_of(&self, c: RoomCoords) -> Option<ZoneKey> {
        let m = &self.meta;
        if c.x < m.min_x || c.x > m.max_x || c.y < m.min_y || c.y > m.max_y {
            return None;
        }
        Some(ZoneKey::of(c))
    }

    /// Never downloads.
    pub async fn room_at_cached(&self, c: RoomCoords) -> Option<Room> {
        self.cache.lock().await.rooms.get(c).cloned()
    }

    /// The room at `c`, downloading its zone first if needed.
    pub async fn get_room_at(&self, c: RoomCoords) -> Result<Option<Room>, MapError> {
        let Some(zone) = self.zone_of(c) else {
            return Ok(None);
        };
        {
            let cache = self.cache.lock().await;
            if cache.missing.contains(&zone) {
                return Ok(None);
            }
            if cache.cached.contains(&zone) {
                return Ok(cache.rooms.get(c).cloned());
            }
        }

        info!(zone = %zone, "downloading map zone");
        let path = zone.path();
        match self.source.fetch(&path).await {
            Ok(raw) => {
                self.cache_zone(zone, &raw).await?;
            }
            Err(err) if err.is_not_found() => {
                self.mark_missing(zone).await;
                return Ok(None);
            }
            Err(err) => return Err(MapError::Fetch { path, err }),
        }
        Ok(self.room_at_cached(c).await)
    }

    /// Fetches every room that exists at `coords`. Rooms are sent to
    /// `progress` as they become available: first everything already cached
    /// (always sent, maybe empty), then one batch per downloaded zone. Returns
    /// all of them once every download settled. Download failures are logged
    /// and their rooms left out. Once `progress` is closed nobody is listening
    /// any more, so downloads still in flight are dropped and only what was
    /// gathered so far is returned.
    pub async fn get_rooms_at(
        &self,
        coords: &[RoomCoords],
        progress: &mpsc::UnboundedSender<Vec<Room>>,
    ) -> Vec<Room> {
        let mut in_cache = Vec::new();
        let mut wanted: HashMap<ZoneKey, HashSet<RoomCoords>> = HashMap::new();
        {
            let cache = self.cache.lock().await;
            for &c in coords {
                let Some(zone) = self.zone_of(c) else {
                    continue;
                };
                if cache.missing.contains(&zone) {
                    continue;
                }
                if cache.cached.contains(&zone) {
                    if let Some(room) = cache.rooms.get(c) {
                        in_cache.push(room.clone());
                    }
                } else {
                    wanted.entry(zone).or_default().insert(c);
                }
            }
        }

        if progress.send(in_cache.clone()).is_err() {
            debug!("nobody wants the nearby rooms, skipping downloads");
            return in_cache;
        }
        let mut all = in_cache;

        let mut downloads = FuturesUnordered::new();
        for &zone in wanted.keys() {
            downloads.push(self.download_zone(zone));
        }

        while let Some((zone, res)) = downloads.next().await {
            let raw = match res {
                Ok(raw) => raw,
                Err(err) => {
                    self.download_failed(zone, err).await;
                    continue;
                }
            };
            let rooms = match self.cache_zone(zone, &raw).await {
                Ok(rooms) => rooms,
                Err(e) => {
                    error!(zone = %zone, err = %e, "unusable map zone");
                    continue;
                }
            };
            let Some(needed) = wanted.get(&zone) else {
                continue;
            };
            let batch: Vec<Room> = rooms
                .into_iter()
                .filter(|r| needed.contains(&r.coords()))
                .collect();
            debug!(zone = %zone, rooms = batch.len(), "zone downloaded");
            all.extend(batch.iter().cloned());
            if progress.send(batch).is_err() {
                debug!(pending = downloads.len(), "nearby rooms abandoned");
                break;
            }
        }

        all
    }

    async fn download_zone(&self, zone: ZoneKey) -> (ZoneKey, Result<Bytes, FetchError>) {
        info!(zone = %zone, "downloading map zone");
        (zone, self.source.fetch(&zone.path()).await)
    }

    async fn download_failed(&self, zone: ZoneKey, err: FetchError) {
        if err.is_not_found() {
            self.mark_missing(zone).await;
        } else {
            error!(zone = %zone, err = %err, "downloading map zone failed");
        }
    }

    async fn mark_missing(&self, zone: ZoneKey) {
        // Not an error: zones without rooms are simply not on the server.
        debug!(zone = %zone, "map zone does not exist");
        self.cache.lock().await.missing.insert(zone);
    }

    /// Stores a downloaded zone and returns the rooms it added. Invalid rooms
    /// are skipped, and then the zone is not marked cached so a later request
    /// retries it.
    async fn cache_zone(&self, zone: ZoneKey, raw: &[u8]) -> Result<Vec<Room>, MapError> {
        let json: Vec<serde_json::Value> =
            serde_json::from_slice(raw).map_err(|err| MapError::Json {
                path: zone.path(),
                err,
            })?;

        let mut cache = self.cache.lock().await;
        let mut added = Vec::with_capacity(json.len());
        let mut invalid = 0usize;
        for (i, v) in json.into_iter().enumerate() {
            let missing = missing_keys(&v, room::REQUIRED);
            if !missing.is_empty() {
                error!(zone = %zone, room = i, missing = ?missing, "room lacks properties");
                invalid += 1;
                continue;
            }
            let data: RoomData = match serde_json::from_value(v) {
                Ok(d) => d,
                Err(e) => {
                    error!(zone = %zone, room = i, err = %e, "malformed room");
                    invalid += 1;
                    continue;
                }
            };
            let room = Room::new(data);
            if let Err(e) = cache.rooms.set(room.coords(), room.clone()) {
                warn!(zone = %zone, room = i, err = %e, "room outside the map");
                invalid += 1;
                continue;
            }
            added.push(room);
        }

        if invalid == 0 {
            cache.cached.insert(zone);
        }
        info!(zone = %zone, rooms = added.len(), invalid, "cached map zone");
        Ok(added)
    }
}
