use std::collections::HashSet;
use std::sync::Arc;

use mumexml::{Tag, XmlParser};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::coords::RoomCoords;
use crate::error::MapError;
use crate::index::RoomIndex;
use crate::meta::MapMetaData;
use crate::path::PathResolver;
use crate::room::Room;
use crate::source::MapSource;
use crate::zone::ZoneStore;

/// Everything loaded from one map source.
pub struct WorldMap<S> {
    pub zones: ZoneStore<S>,
    pub index: Arc<RoomIndex<S>>,
}

impl<S: MapSource> WorldMap<S> {
    pub async fn load(source: Arc<S>) -> Result<Self, MapError> {
        let zones = ZoneStore::load(source.clone()).await?;
        Ok(Self {
            zones,
            index: Arc::new(RoomIndex::new(source)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Half-width, in rooms, of the square fetched around each new position.
    pub nearby_radius: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { nearby_radius: 20 }
    }
}

/// What the tracker tells the display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapEvent {
    Moved(RoomCoords),
    /// Rooms near the last position, in arrival order. Rooms already sent are
    /// not sent again.
    Rooms(Vec<Room>),
    RoomsSettled { around: RoomCoords, total: usize },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SessionOutput {
    pub text: String,
    pub upstream: Vec<u8>,
}

/// What the session hands its tracker task.
#[derive(Debug)]
enum TrackerMsg {
    Tag(Tag),
    /// Jump straight to a known position.
    Reposition(RoomCoords),
}

/// One connection's worth of parsing and tracking.
///
/// The parser runs inline in [`MapSession::filter_input_text`]. Closed tags go
/// to a tracker task that resolves positions. The surroundings of each
/// position load on their own task, so neither the game text nor the next
/// position ever waits for a zone download.
pub struct MapSession {
    parser: XmlParser,
    to_tracker: Option<mpsc::UnboundedSender<TrackerMsg>>,
    tracker: Option<JoinHandle<Result<(), MapError>>>,
}

impl MapSession {
    /// Must be called from within a tokio runtime. With no map the text is
    /// still filtered and the tags are dropped.
    pub fn new<S: MapSource>(
        map: Option<Arc<WorldMap<S>>>,
        events: mpsc::UnboundedSender<MapEvent>,
        cfg: TrackerConfig,
    ) -> Self {
        let Some(map) = map else {
            return Self::without_map();
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = tokio::spawn(track(map, rx, events, cfg));
        Self {
            parser: XmlParser::new(),
            to_tracker: Some(tx),
            tracker: Some(tracker),
        }
    }

    pub fn without_map() -> Self {
        Self {
            parser: XmlParser::new(),
            to_tracker: None,
            tracker: None,
        }
    }

    /// A (re)connection to the game started.
    pub fn connected(&mut self) {
        self.parser.connected();
    }

    pub fn filter_input_text(&mut self, chunk: &str) -> SessionOutput {
        let filtered = self.parser.filter_input_text(chunk);
        for tag in filtered.tags {
            if !self.send(TrackerMsg::Tag(tag)) {
                break;
            }
        }
        SessionOutput {
            text: filtered.text,
            upstream: filtered.upstream,
        }
    }

    /// Places the player at `at` as if a room there had just been seen:
    /// `Moved` is emitted and the surroundings are loaded.
    pub fn set_position(&mut self, at: RoomCoords) {
        self.send(TrackerMsg::Reposition(at));
    }

    fn send(&mut self, msg: TrackerMsg) -> bool {
        let Some(tx) = &self.to_tracker else {
            return false;
        };
        if tx.send(msg).is_err() {
            // Tracker is gone; tracker_finished() reports why.
            self.to_tracker = None;
            return false;
        }
        true
    }

    /// Resolves once the tracker stopped, with its error if it failed. Never
    /// resolves without a map. Safe to use in a `select!` loop.
    pub async fn tracker_finished(&mut self) -> Result<(), MapError> {
        let Some(handle) = self.tracker.as_mut() else {
            return std::future::pending().await;
        };
        let res = handle.await;
        self.tracker = None;
        self.to_tracker = None;
        match res {
            Ok(r) => r,
            Err(e) => Err(MapError::TrackerJoin(e.to_string())),
        }
    }
}

/// Coordinates already sent to the display.
type Shown = Arc<Mutex<HashSet<RoomCoords>>>;

async fn track<S: MapSource>(
    map: Arc<WorldMap<S>>,
    mut inbox: mpsc::UnboundedReceiver<TrackerMsg>,
    events: mpsc::UnboundedSender<MapEvent>,
    cfg: TrackerConfig,
) -> Result<(), MapError> {
    let mut resolver = PathResolver::new(map.index.clone());
    let shown: Shown = Arc::default();

    while let Some(msg) = inbox.recv().await {
        let here = match msg {
            TrackerMsg::Tag(tag) => match resolver.process_tag(&tag).await? {
                Some(here) => here,
                None => continue,
            },
            TrackerMsg::Reposition(at) => {
                resolver.set_here(at);
                at
            }
        };
        info!(at = %here, "moved");
        if events.send(MapEvent::Moved(here)).is_err() {
            break;
        }
        // Detached: stops by itself once the display is gone.
        tokio::spawn(load_nearby(
            map.clone(),
            here,
            cfg.nearby_radius,
            shown.clone(),
            events.clone(),
        ));
    }
    debug!("map tracker done");
    Ok(())
}

/// Sends the rooms around `here` that were not shown yet, batch by batch,
/// then `RoomsSettled`.
async fn load_nearby<S: MapSource>(
    map: Arc<WorldMap<S>>,
    here: RoomCoords,
    radius: i32,
    shown: Shown,
    events: mpsc::UnboundedSender<MapEvent>,
) {
    let wanted = coords_near(map.zones.meta(), here, radius, &*shown.lock().await);
    let (tx, rx) = mpsc::unbounded_channel::<Vec<Room>>();
    let fetch = async {
        let tx = tx;
        map.zones.get_rooms_at(&wanted, &tx).await
    };
    let forward = async {
        let mut rx = rx;
        while let Some(mut batch) = rx.recv().await {
            // Another load may have shown some of them meanwhile.
            {
                let mut shown = shown.lock().await;
                batch.retain(|r| shown.insert(r.coords()));
            }
            debug!(rooms = batch.len(), around = %here, "nearby rooms");
            if events.send(MapEvent::Rooms(batch)).is_err() {
                break;
            }
        }
    };
    let (all, ()) = tokio::join!(fetch, forward);

    let settled = MapEvent::RoomsSettled {
        around: here,
        total: all.len(),
    };
    if events.send(settled).is_err() {
        debug!(around = %here, "display gone before the rooms settled");
    }
}

/// The square of side `2 * radius` around `here`, across every level, minus
/// what was already shown.
fn coords_near(
    meta: &MapMetaData,
    here: RoomCoords,
    radius: i32,
    shown: &HashSet<RoomCoords>,
) -> Vec<RoomCoords> {
    let mut out = Vec::new();
    for x in here.x.saturating_sub(radius)..here.x.saturating_add(radius) {
        for y in here.y.saturating_sub(radius)..here.y.saturating_add(radius) {
            for z in meta.min_z..=meta.max_z {
                let c = RoomCoords::new(x, y, z);
                if !shown.contains(&c) {
                    out.push(c);
                }
            }
        }
    }
    out
}
