use std::collections::HashMap;
use std::sync::Arc;

use md5::{Digest, Md5};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::coords::RoomCoords;
use crate::error::MapError;
use crate::normalize::{collapse_whitespace, normalize};
use crate::source::MapSource;

fn md5_hex(s: &str) -> String {
    format!("{:x}", Md5::digest(s.as_bytes()))
}

/// The key MMapper files a room under. Must stay identical to what built the
/// hosted index.
pub fn hash_name_desc(name: &str, desc: &str) -> String {
    let name = normalize(name);
    let desc = normalize(&collapse_whitespace(desc));
    md5_hex(&format!("{name}\n{desc}"))
}

/// The hosted name+description index, downloaded one chunk (first two hex
/// digits of the hash) at a time.
pub struct RoomIndex<S> {
    source: Arc<S>,
    entries: Mutex<HashMap<String, Vec<RoomCoords>>>,
    // Set once a chunk's entries are merged. Concurrent lookups wait on the
    // same cell instead of downloading twice.
    chunks: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl<S: MapSource> RoomIndex<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
            chunks: Mutex::new(HashMap::new()),
        }
    }

    /// Every position known for this room. Empty when the index has never
    /// heard of it.
    pub async fn find_pos_by_name_desc(
        &self,
        name: &str,
        desc: &str,
    ) -> Result<Vec<RoomCoords>, MapError> {
        let hash = hash_name_desc(name, desc);
        let chunk = &hash[..2];

        let cell = {
            let mut chunks = self.chunks.lock().await;
            chunks
                .entry(chunk.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_try_init(|| self.download_chunk(chunk)).await?;

        let entries = self.entries.lock().await;
        match entries.get(&hash) {
            Some(found) => {
                debug!(room = name, hash = %hash, found = ?found, "room found in index");
                Ok(found.clone())
            }
            None => {
                info!(room = name, hash = %hash, "unknown room");
                Ok(Vec::new())
            }
        }
    }

    async fn download_chunk(&self, chunk: &str) -> Result<(), MapError> {
        let path = format!("roomindex/{chunk}.json");
        debug!(path = %path, "downloading index chunk");
        let raw = self
            .source
            .fetch(&path)
            .await
            .map_err(|err| MapError::Fetch {
                path: path.clone(),
                err,
            })?;
        let json: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(&raw).map_err(|err| MapError::Json {
                path: path.clone(),
                err,
            })?;
        self.update_cache(chunk, json).await;
        Ok(())
    }

    async fn update_cache(&self, chunk: &str, json: serde_json::Map<String, serde_json::Value>) {
        let mut entries = self.entries.lock().await;
        let old_size = entries.len();
        let mut invalid = 0usize;
        let mut stray = 0usize;

        for (hash, v) in json {
            let Ok(raw) = serde_json::from_value::<Vec<[i32; 3]>>(v) else {
                invalid += 1;
                continue;
            };
            if !hash.starts_with(chunk) {
                stray += 1;
            }
            entries.insert(hash, raw.into_iter().map(RoomCoords::from).collect());
        }

        info!(
            chunk,
            new = entries.len() - old_size,
            total = entries.len(),
            invalid,
            "cached index chunk"
        );
        if stray != 0 {
            warn!(chunk, stray, "index chunk holds entries for other chunks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::MemorySource;

    #[test]
    fn md5_matches_reference() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(
            md5_hex("The quick brown fox jumps over the lazy dog"),
            "9e107d9d372bb6826bd81d3542a419d6"
        );
        assert_eq!(hash_name_desc("", ""), "68b329da9893e34099c7d8ad5cb9c940");
    }

    #[test]
    fn hash_ignores_trivial_changes() {
        let a = hash_name_desc(
            "Forêt de Fangorn",
            "Tall trees surround you.\nA path leads north.\n",
        );
        let b = hash_name_desc(
            "\x1b[32mForet de Fangorn\x1b[0m",
            "Tall  trees surround you. A path\tleads north. ",
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        // Whitespace in the name is significant.
        assert_ne!(hash_name_desc("A  Room", "x"), hash_name_desc("A Room", "x"));
    }

    fn chunk_path(hash: &str) -> String {
        format!("roomindex/{}.json", &hash[..2])
    }

    #[tokio::test]
    async fn finds_known_rooms_and_reports_unknown() {
        let src = Arc::new(MemorySource::new());
        let hash = hash_name_desc("Bree Gate", "A gate.\n");
        src.put_json(
            &chunk_path(&hash),
            &serde_json::json!({ hash.clone(): [[10, 20, 0], [11, 20, 0]] }),
        );

        let idx = RoomIndex::new(src.clone());
        let found = idx.find_pos_by_name_desc("Bree Gate", "A gate.\n").await.unwrap();
        assert_eq!(
            found,
            vec![RoomCoords::new(10, 20, 0), RoomCoords::new(11, 20, 0)]
        );

        // Only the whitespace differs: answered from memory.
        let again = idx.find_pos_by_name_desc("Bree Gate", "A gate. ").await.unwrap();
        assert_eq!(again, found);
        assert_eq!(src.fetches(&chunk_path(&hash)), 1);
    }

    #[tokio::test]
    async fn unknown_chunk_is_an_empty_answer() {
        let src = Arc::new(MemorySource::new());
        let hash = hash_name_desc("Nowhere", "Nothing.");
        src.put_json(&chunk_path(&hash), &serde_json::json!({}));

        let idx = RoomIndex::new(src.clone());
        assert!(idx.find_pos_by_name_desc("Nowhere", "Nothing.").await.unwrap().is_empty());
        assert!(idx.find_pos_by_name_desc("Nowhere", "Nothing.").await.unwrap().is_empty());
        assert_eq!(src.total_fetches(), 1);
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_download() {
        let src = Arc::new(MemorySource::new());
        let hash = hash_name_desc("Crossroads", "Roads cross here.");
        src.put_json(&chunk_path(&hash), &serde_json::json!({ hash.clone(): [[1, 2, 3]] }));

        let idx = RoomIndex::new(src.clone());
        let (a, b, c) = tokio::join!(
            idx.find_pos_by_name_desc("Crossroads", "Roads cross here."),
            idx.find_pos_by_name_desc("Crossroads", "Roads cross here."),
            idx.find_pos_by_name_desc("Crossroads", "Roads  cross here."),
        );
        assert_eq!(a.unwrap(), vec![RoomCoords::new(1, 2, 3)]);
        assert_eq!(b.unwrap(), vec![RoomCoords::new(1, 2, 3)]);
        assert_eq!(c.unwrap(), vec![RoomCoords::new(1, 2, 3)]);
        assert_eq!(src.fetches(&chunk_path(&hash)), 1);
    }

    #[tokio::test]
    async fn malformed_entries_are_dropped() {
        let src = Arc::new(MemorySource::new());
        let hash = hash_name_desc("Good", "Fine.");
        let mut body = serde_json::Map::new();
        body.insert(hash.clone(), serde_json::json!([[5, 6, 7]]));
        for (i, bad) in [
            serde_json::json!("nope"),
            serde_json::json!([[1, 2]]),
            serde_json::json!([[1, 2, 3], [4]]),
            serde_json::json!([1, 2, 3]),
        ]
        .into_iter()
        .enumerate()
        {
            body.insert(format!("{}{i:030}", &hash[..2]), bad);
        }
        src.put_json(&chunk_path(&hash), &serde_json::Value::Object(body));

        let idx = RoomIndex::new(src.clone());
        let found = idx.find_pos_by_name_desc("Good", "Fine.").await.unwrap();
        assert_eq!(found, vec![RoomCoords::new(5, 6, 7)]);
        assert_eq!(idx.entries.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_download_is_retried() {
        let src = Arc::new(MemorySource::new());
        let hash = hash_name_desc("Flaky", "Sometimes there.");
        let path = chunk_path(&hash);
        src.fail(&path, 503);

        let idx = RoomIndex::new(src.clone());
        let err = idx.find_pos_by_name_desc("Flaky", "Sometimes there.").await.unwrap_err();
        assert!(matches!(err, MapError::Fetch { .. }));

        src.put_json(&path, &serde_json::json!({ hash.clone(): [[0, 0, 0]] }));
        let found = idx.find_pos_by_name_desc("Flaky", "Sometimes there.").await.unwrap();
        assert_eq!(found, vec![RoomCoords::new(0, 0, 0)]);
        assert_eq!(src.fetches(&path), 2);

        src.put(&path, "not json");
        let other = RoomIndex::new(src.clone());
        assert!(matches!(
            other.find_pos_by_name_desc("Flaky", "Sometimes there.").await,
            Err(MapError::Json { .. })
        ));
    }
}
